use std::{collections::HashMap, fmt, sync::Arc};

use tracing::{debug, info};

use super::{
    sender::{SenderId, SenderRef},
    work_queue::{Step, WorkQueue},
    Message,
};

/// Именованная очередь: набор подписчиков и рассылка им сообщений.
///
/// Очередь создаётся реестром при первом запросе имени и больше не
/// удаляется.
#[derive(Clone)]
pub struct QueueRef {
    name: Arc<str>,
    work: WorkQueue<QueueState>,
}

struct QueueState {
    name: Arc<str>,
    subscribers: HashMap<SenderId, SenderRef>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl QueueRef {
    /// Запускает пустую очередь с указанным именем.
    pub fn spawn(name: Arc<str>) -> Self {
        let work = WorkQueue::spawn(
            format!("queue:{name}"),
            QueueState {
                name: name.clone(),
                subscribers: HashMap::new(),
            },
        );
        Self { name, work }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Рассылает сообщение всем текущим подписчикам.
    ///
    /// Каждый подписчик получает доставку в собственную очередь работы,
    /// поэтому медленный линк не задерживает остальных.
    pub fn fan_out(
        &self,
        message: Message,
    ) {
        self.work.submit(move |s| {
            debug!(
                queue = %s.name,
                id = %message.id,
                subscribers = s.subscribers.len(),
                "Fan-out"
            );
            for sender in s.subscribers.values() {
                sender.deliver(message.clone());
            }
            Step::Continue
        });
    }

    /// Добавляет подписчика. Повторная подписка того же отправителя ничего
    /// не меняет.
    pub fn subscribe(
        &self,
        sender: SenderRef,
    ) {
        self.work.submit(move |s| {
            info!(queue = %s.name, sender = %sender.id(), "Subscribed");
            s.subscribers.insert(sender.id(), sender);
            Step::Continue
        });
    }

    /// Удаляет подписчика и подтверждает ему отписку.
    ///
    /// Подтверждение отправляется всегда, даже если подписчика в наборе не
    /// было: иначе закрывающийся отправитель никогда бы не освободился.
    pub fn unsubscribe(
        &self,
        sender: SenderRef,
    ) {
        self.work.submit(move |s| {
            if s.subscribers.remove(&sender.id()).is_some() {
                info!(queue = %s.name, sender = %sender.id(), "Unsubscribed");
            }
            sender.notify_subscription_removed();
            Step::Continue
        });
    }

    /// Количество подписчиков (`None`, если очередь остановлена).
    pub async fn subscriber_count(&self) -> Option<usize> {
        self.work.query(|s| s.subscribers.len()).await
    }

    /// Идентификаторы подписчиков в порядке возрастания.
    pub async fn subscriber_ids(&self) -> Option<Vec<SenderId>> {
        self.work
            .query(|s| {
                let mut ids: Vec<_> = s.subscribers.keys().copied().collect();
                ids.sort();
                ids
            })
            .await
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для QueueRef
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for QueueRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("QueueRef").field("name", &self.name).finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
