//! Подписчик: одна сторона исходящего линка.
//!
//! Отправитель связывает линк протокольного движка с очередью, к которой
//! он привязан. Жизненный цикл:
//!
//! ```text
//! создан ──bind──▶ привязан ──notify_link_closed──▶ закрывается
//!   │                                                   │
//!   └──notify_link_closed──▶ освобождён ◀──notify_subscription_removed
//! ```
//!
//! Освобождение привязанного отправителя происходит только после того, как
//! очередь подтвердила отписку. Поэтому очередь никогда не держит ссылку на
//! уже уничтоженного отправителя.

use std::fmt;

use tracing::{debug, trace};

use super::{
    queue::QueueRef,
    transport::{Link, LinkId},
    work_queue::{Step, WorkQueue},
    Message,
};

/// Идентификатор отправителя, уникальный в пределах процесса.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SenderId {
    pub connection: u64,
    pub seq: u64,
}

/// Владелец набора отправителей (супервизор соединения).
///
/// Отправитель сообщает владельцу, что его больше не нужно отслеживать.
/// Реализация обязана только поставить работу в свою очередь.
pub trait SenderOwner: Send + Sync + 'static {
    fn forget(
        &self,
        link: LinkId,
        sender: SenderId,
    );
}

/// Дескриптор отправителя. Дёшево клонируется.
#[derive(Clone)]
pub struct SenderRef {
    id: SenderId,
    link: LinkId,
    work: WorkQueue<SenderState>,
}

struct SenderState {
    this: SenderRef,
    link: Box<dyn Link>,
    owner: Box<dyn SenderOwner>,
    queue: Option<QueueRef>,
    closing: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SenderRef {
    /// Создаёт отправителя для только что открытого линка.
    pub fn spawn(
        id: SenderId,
        link: Box<dyn Link>,
        owner: Box<dyn SenderOwner>,
    ) -> Self {
        let link_id = link.id().clone();
        let label = format!("sender:{}/{}", id.connection, link_id);
        let work = WorkQueue::spawn_with(label, |work| SenderState {
            this: SenderRef {
                id,
                link: link_id.clone(),
                work: work.clone(),
            },
            link,
            owner,
            queue: None,
            closing: false,
        });
        Self {
            id,
            link: link_id,
            work,
        }
    }

    pub fn id(&self) -> SenderId {
        self.id
    }

    pub fn link_id(&self) -> &LinkId {
        &self.link
    }

    /// Передаёт сообщение линку. Для закрывающегося отправителя ничего не
    /// делает.
    pub fn deliver(
        &self,
        message: Message,
    ) {
        self.work.submit(move |s| {
            if s.closing {
                trace!(link = %s.this.link, id = %message.id, "Delivery to closing sender skipped");
            } else {
                s.link.send(&message);
            }
            Step::Continue
        });
    }

    /// Привязывает отправителя к очереди и открывает линк к её имени.
    pub fn bind(
        &self,
        queue: QueueRef,
        name: &str,
    ) {
        let name = name.to_string();
        self.work.submit(move |s| {
            if s.closing || s.queue.is_some() {
                trace!(link = %s.this.link, queue = %name, "Bind ignored");
                return Step::Continue;
            }
            queue.subscribe(s.this.clone());
            s.queue = Some(queue);
            s.link.open(&name);
            Step::Continue
        });
    }

    /// Линк закрыт со стороны клиента.
    pub fn notify_link_closed(&self) {
        self.work.submit(|s| {
            if s.closing {
                return Step::Continue;
            }
            s.closing = true;

            match &s.queue {
                Some(queue) => {
                    queue.unsubscribe(s.this.clone());
                    s.owner.forget(s.this.link.clone(), s.this.id);
                    Step::Continue
                }
                None => {
                    s.owner.forget(s.this.link.clone(), s.this.id);
                    debug!(link = %s.this.link, "Unbound sender released");
                    Step::Release
                }
            }
        });
    }

    /// Очередь подтвердила отписку: отправитель освобождается.
    pub fn notify_subscription_removed(&self) {
        self.work.submit(|s| {
            debug!(link = %s.this.link, "Sender released after unsubscribe");
            Step::Release
        });
    }

    pub fn is_released(&self) -> bool {
        self.work.is_released()
    }

    /// Имя очереди, к которой привязан отправитель.
    ///
    /// Внешний `None` означает, что отправитель уже освобождён.
    pub async fn bound_queue(&self) -> Option<Option<String>> {
        self.work
            .query(|s| s.queue.as_ref().map(|q| q.name().to_string()))
            .await
    }

    /// Закрывается ли отправитель; `None`, если он уже освобождён.
    pub async fn is_closing(&self) -> Option<bool> {
        self.work.query(|s| s.closing).await
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для SenderRef
////////////////////////////////////////////////////////////////////////////////

impl PartialEq for SenderRef {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.id == other.id
    }
}

impl Eq for SenderRef {}

impl fmt::Debug for SenderRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SenderRef")
            .field("id", &self.id)
            .field("link", &self.link)
            .field("released", &self.is_released())
            .finish()
    }
}

impl fmt::Display for SenderId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}.{}", self.connection, self.seq)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use parking_lot::Mutex;
    use tokio::time::timeout;

    use super::*;
    use crate::pubsub::{MemoryTransport, MessageId};

    /// Владелец, который просто запоминает вызовы `forget`.
    #[derive(Clone, Default)]
    struct RecordingOwner(Arc<Mutex<Vec<(LinkId, SenderId)>>>);

    impl SenderOwner for RecordingOwner {
        fn forget(
            &self,
            link: LinkId,
            sender: SenderId,
        ) {
            self.0.lock().push((link, sender));
        }
    }

    fn sender_id(seq: u64) -> SenderId {
        SenderId { connection: 1, seq }
    }

    async fn wait_released(sender: &SenderRef) {
        timeout(Duration::from_secs(1), async {
            while !sender.is_released() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("sender was not released");
    }

    /// Тест проверяет, что непривязанный отправитель освобождается сразу
    /// при закрытии линка и убирает себя из набора владельца.
    #[tokio::test]
    async fn test_unbound_sender_released_on_close() {
        let transport = MemoryTransport::new();
        let owner = RecordingOwner::default();
        let sender = SenderRef::spawn(
            sender_id(1),
            Box::new(transport.link("l1")),
            Box::new(owner.clone()),
        );

        sender.notify_link_closed();
        wait_released(&sender).await;

        let forgotten = owner.0.lock().clone();
        assert_eq!(forgotten.len(), 1);
        assert_eq!(&*forgotten[0].0, "l1");
        assert_eq!(forgotten[0].1, sender_id(1));
    }

    /// Тест проверяет, что доставка идёт в линк, пока отправитель открыт.
    #[tokio::test]
    async fn test_deliver_sends_to_link() {
        let transport = MemoryTransport::new();
        let sender = SenderRef::spawn(
            sender_id(2),
            Box::new(transport.link("l2")),
            Box::new(RecordingOwner::default()),
        );

        sender.deliver(Message::new(MessageId::new(1), "hello"));
        sender.deliver(Message::new(MessageId::new(2), "world"));
        sender.bound_queue().await.unwrap();

        let texts: Vec<_> = transport
            .deliveries("l2")
            .iter()
            .map(|m| m.text().to_string())
            .collect();
        assert_eq!(texts, ["hello", "world"]);
    }

    /// Тест проверяет, что привязанный отправитель ждёт подтверждения
    /// отписки и игнорирует повторное закрытие и доставку.
    #[tokio::test]
    async fn test_bound_sender_waits_for_unsubscribe() {
        let transport = MemoryTransport::new();
        let owner = RecordingOwner::default();
        let queue = QueueRef::spawn("alerts".into());
        let sender = SenderRef::spawn(
            sender_id(3),
            Box::new(transport.link("l3")),
            Box::new(owner.clone()),
        );

        sender.bind(queue.clone(), "alerts");
        assert_eq!(sender.bound_queue().await, Some(Some("alerts".to_string())));
        assert_eq!(transport.opened_address("l3").as_deref(), Some("alerts"));

        sender.notify_link_closed();
        sender.notify_link_closed();
        sender.deliver(Message::new(MessageId::new(9), "late"));

        wait_released(&sender).await;
        assert!(transport.deliveries("l3").is_empty());
        assert_eq!(owner.0.lock().len(), 1);
        assert_eq!(queue.subscriber_count().await, Some(0));
    }
}
