use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tracing::{debug, info};

use super::{
    queue::QueueRef,
    sender::SenderRef,
    work_queue::{Step, WorkQueue},
    Message, MessageId,
};

/// Имя очереди для линков, открытых без адреса.
///
/// Публикация в эту очередь всегда отбрасывается.
pub const NONAME_QUEUE: &str = "__NONAME__";

/// Сводка по реестру.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    /// Количество созданных очередей.
    pub queues: usize,
    /// Сообщений, маршрутизированных в существующую очередь.
    pub published: u64,
    /// Публикаций, отброшенных из-за отсутствия очереди.
    pub dropped: u64,
}

/// Реестр очередей: отображение имени в очередь и точка публикации.
///
/// Дескриптор дёшево клонируется и может использоваться из любого потока,
/// в том числе внешним производителем вне рантайма.
#[derive(Clone)]
pub struct QueueRegistry {
    work: WorkQueue<RegistryState>,
    counter: Arc<AtomicU64>,
}

struct RegistryState {
    queues: HashMap<Arc<str>, QueueRef>,
    counter: Arc<AtomicU64>,
    published: u64,
    dropped: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl QueueRegistry {
    /// Создаёт пустой реестр. Должен вызываться внутри рантайма tokio.
    pub fn new() -> Self {
        let counter = Arc::new(AtomicU64::new(1));
        let work = WorkQueue::spawn(
            "registry",
            RegistryState {
                queues: HashMap::new(),
                counter: counter.clone(),
                published: 0,
                dropped: 0,
            },
        );
        Self { work, counter }
    }

    /// Публикует текст в очередь с указанным именем.
    ///
    /// Если очереди нет, сообщение отбрасывается. Очередь публикацией
    /// никогда не создаётся.
    pub fn publish(
        &self,
        name: impl Into<String>,
        text: impl Into<Arc<str>>,
    ) {
        let name = name.into();
        let text = text.into();
        self.work.submit(move |s| {
            s.route(&name, text);
            Step::Continue
        });
    }

    /// Находит или создаёт очередь для запрошенного адреса и привязывает к
    /// ней отправителя.
    ///
    /// Пустой адрес заменяется на [`NONAME_QUEUE`].
    pub fn resolve_queue_for_subscriber(
        &self,
        sender: SenderRef,
        requested: impl Into<String>,
    ) {
        let requested = requested.into();
        self.work.submit(move |s| {
            let name: Arc<str> = if requested.is_empty() {
                Arc::from(NONAME_QUEUE)
            } else {
                Arc::from(requested)
            };
            let queue = s
                .queues
                .entry(name.clone())
                .or_insert_with(|| {
                    info!(queue = %name, "Queue created");
                    QueueRef::spawn(name.clone())
                })
                .clone();
            sender.bind(queue, &name);
            Step::Continue
        });
    }

    /// Сводка по реестру (`None`, если реестр уже остановлен).
    pub async fn stats(&self) -> Option<RegistryStats> {
        self.work
            .query(|s| RegistryStats {
                queues: s.queues.len(),
                published: s.published,
                dropped: s.dropped,
            })
            .await
    }

    /// Имена всех очередей в алфавитном порядке.
    pub async fn queue_names(&self) -> Vec<String> {
        let mut names = self
            .work
            .query(|s| s.queues.keys().map(|k| k.to_string()).collect::<Vec<_>>())
            .await
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Очередь с указанным именем, если она уже создана.
    pub async fn queue(
        &self,
        name: &str,
    ) -> Option<QueueRef> {
        let name = name.to_string();
        self.work
            .query(move |s| s.queues.get(name.as_str()).cloned())
            .await
            .flatten()
    }

    /// Количество подписчиков очереди; `None`, если очереди нет.
    pub async fn subscriber_count(
        &self,
        name: &str,
    ) -> Option<usize> {
        self.queue(name).await?.subscriber_count().await
    }

    /// Порядковый номер, который получит следующее маршрутизированное
    /// сообщение.
    pub fn next_message_seq(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl RegistryState {
    fn route(
        &mut self,
        name: &str,
        text: Arc<str>,
    ) {
        if name.is_empty() || name == NONAME_QUEUE {
            self.dropped += 1;
            debug!(queue = %name, "Publish to unnamed queue dropped");
            return;
        }
        let Some(queue) = self.queues.get(name) else {
            self.dropped += 1;
            debug!(queue = %name, "Publish to unknown queue dropped");
            return;
        };

        let id = MessageId::new(self.counter.fetch_add(1, Ordering::Relaxed));
        self.published += 1;
        debug!(queue = %name, %id, "Message routed");
        queue.fan_out(Message::new(id, text));
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для QueueRegistry
////////////////////////////////////////////////////////////////////////////////

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueueRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("next_message_seq", &self.next_message_seq())
            .field("released", &self.work.is_released())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::{LinkId, MemoryTransport, SenderId, SenderOwner};

    struct NoOwner;

    impl SenderOwner for NoOwner {
        fn forget(
            &self,
            _link: LinkId,
            _sender: SenderId,
        ) {
        }
    }

    fn subscribe(
        registry: &QueueRegistry,
        transport: &MemoryTransport,
        seq: u64,
        address: &str,
    ) -> SenderRef {
        let sender = SenderRef::spawn(
            SenderId { connection: 1, seq },
            Box::new(transport.link(format!("l{seq}"))),
            Box::new(NoOwner),
        );
        registry.resolve_queue_for_subscriber(sender.clone(), address);
        sender
    }

    /// Тест проверяет, что публикация в несуществующую очередь не создаёт
    /// её и не тратит номер сообщения.
    #[tokio::test]
    async fn test_publish_unknown_queue_dropped() {
        let registry = QueueRegistry::new();
        registry.publish("nobody", "hello");

        let stats = registry.stats().await.unwrap();
        assert_eq!(stats, RegistryStats { queues: 0, published: 0, dropped: 1 });
        assert!(registry.queue_names().await.is_empty());
        assert_eq!(registry.next_message_seq(), 1);
    }

    /// Тест проверяет, что один адрес разрешается в одну очередь.
    #[tokio::test]
    async fn test_same_address_same_queue() {
        let registry = QueueRegistry::new();
        let transport = MemoryTransport::new();
        let a = subscribe(&registry, &transport, 1, "alerts");
        let b = subscribe(&registry, &transport, 2, "alerts");

        assert_eq!(registry.queue_names().await, ["alerts"]);
        a.bound_queue().await.unwrap();
        b.bound_queue().await.unwrap();
        assert_eq!(registry.subscriber_count("alerts").await, Some(2));
    }

    /// Тест проверяет, что пустой адрес ведёт в очередь-заглушку, в которую
    /// публикация невозможна.
    #[tokio::test]
    async fn test_empty_address_maps_to_sentinel() {
        let registry = QueueRegistry::new();
        let transport = MemoryTransport::new();
        let sender = subscribe(&registry, &transport, 1, "");

        assert_eq!(
            sender.bound_queue().await,
            Some(Some(NONAME_QUEUE.to_string()))
        );
        assert_eq!(transport.opened_address("l1").as_deref(), Some(NONAME_QUEUE));

        registry.publish(NONAME_QUEUE, "x");
        registry.publish("", "y");
        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.published, 0);
    }

    /// Тест проверяет формат и монотонность идентификаторов.
    #[tokio::test]
    async fn test_ids_are_sequential() {
        let registry = QueueRegistry::new();
        let transport = MemoryTransport::new();
        let sender = subscribe(&registry, &transport, 1, "tick");
        sender.bound_queue().await.unwrap();
        registry.subscriber_count("tick").await.unwrap();

        registry.publish("tick", "a");
        registry.publish("missing", "b");
        registry.publish("tick", "c");

        assert!(
            transport
                .wait_until(std::time::Duration::from_secs(1), |events| {
                    events.len() >= 3
                })
                .await
        );
        let ids: Vec<_> = transport
            .deliveries("l1")
            .iter()
            .map(|m| m.id.to_string())
            .collect();
        assert_eq!(ids, ["ID:00000001", "ID:00000002"]);
    }
}
