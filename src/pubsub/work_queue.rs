use std::{fmt, sync::Arc};

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// Единица работы над состоянием сущности.
pub type Work<S> = Box<dyn FnOnce(&mut S) -> Step + Send + 'static>;

/// Что делать сущности после выполнения единицы работы.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Продолжить обработку очереди.
    Continue,
    /// Освободить сущность: состояние уничтожается, оставшаяся работа
    /// отбрасывается, последующие `submit` молча не выполняются.
    Release,
}

/// Приватная последовательная очередь работы сущности (actor queue).
///
/// Каждая сущность (реестр, очередь, отправитель, соединение) владеет своим
/// состоянием только внутри собственной задачи tokio. Все изменения
/// состояния приходят сюда как замыкания и выполняются строго по одному, в
/// порядке отправки. Разные сущности исполняются параллельно на пуле
/// потоков рантайма.
///
/// `WorkQueue` дёшево клонируется; клон ссылается на ту же сущность.
pub struct WorkQueue<S> {
    tx: mpsc::UnboundedSender<Work<S>>,
    label: Arc<str>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<S: Send + 'static> WorkQueue<S> {
    /// Запускает сущность с начальным состоянием.
    ///
    /// Должна вызываться внутри рантайма tokio.
    pub fn spawn(
        label: impl Into<Arc<str>>,
        state: S,
    ) -> Self {
        Self::spawn_with(label, |_| state)
    }

    /// Запускает сущность, состояние которой должно знать собственный
    /// дескриптор (например, чтобы передать себя другой сущности).
    pub fn spawn_with<F>(
        label: impl Into<Arc<str>>,
        init: F,
    ) -> Self
    where
        F: FnOnce(&WorkQueue<S>) -> S,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = WorkQueue {
            tx,
            label: label.into(),
        };
        let state = init(&queue);
        tokio::spawn(drain(queue.label.clone(), state, rx));
        queue
    }
}

impl<S> WorkQueue<S> {
    /// Ставит работу в очередь и сразу возвращается.
    ///
    /// Безопасно вызывать из любого потока, в том числе не принадлежащего
    /// рантайму. Возвращает `false`, если сущность уже освобождена; в этом
    /// случае работа молча отбрасывается.
    pub fn submit<F>(
        &self,
        work: F,
    ) -> bool
    where
        F: FnOnce(&mut S) -> Step + Send + 'static,
    {
        match self.tx.send(Box::new(work)) {
            Ok(()) => true,
            Err(_) => {
                trace!(entity = %self.label, "Submission to released entity ignored");
                false
            }
        }
    }

    /// Выполняет чтение состояния в общем порядке очереди.
    ///
    /// Возвращает `None`, если сущность освобождена до выполнения запроса.
    pub async fn query<R, F>(
        &self,
        probe: F,
    ) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&S) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let submitted = self.submit(move |state| {
            let _ = reply_tx.send(probe(state));
            Step::Continue
        });
        if !submitted {
            return None;
        }
        reply_rx.await.ok()
    }

    /// Освобождена ли сущность.
    pub fn is_released(&self) -> bool {
        self.tx.is_closed()
    }

    /// Метка сущности для логов.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Указывают ли два дескриптора на одну сущность.
    pub fn same_entity(
        &self,
        other: &Self,
    ) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Цикл сущности: выполняет работу по одной до `Step::Release`.
async fn drain<S>(
    label: Arc<str>,
    mut state: S,
    mut rx: mpsc::UnboundedReceiver<Work<S>>,
) {
    while let Some(work) = rx.recv().await {
        if work(&mut state) == Step::Release {
            break;
        }
    }

    // После close() новые отправки получают ошибку, а уже поставленная
    // работа выбрасывается вместе с состоянием.
    rx.close();
    let mut discarded = 0usize;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    drop(state);
    trace!(entity = %label, discarded, "Entity released");
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для WorkQueue
////////////////////////////////////////////////////////////////////////////////

impl<S> Clone for WorkQueue<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            label: self.label.clone(),
        }
    }
}

impl<S> fmt::Debug for WorkQueue<S> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("label", &self.label)
            .field("released", &self.is_released())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
