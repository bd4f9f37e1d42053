//! Супервизор соединения.
//!
//! Получает события протокольного движка одного соединения и переводит их в
//! операции ядра: создаёт отправителя на каждый открытый линк, закрывает
//! отправителей при закрытии линка, сессии или транспорта. Сам является
//! сущностью со своей очередью работы, поэтому события одного соединения
//! обрабатываются строго по порядку.

use std::{collections::HashMap, fmt};

use qmon_error::{ErrorExt, LogLevel, ProtocolError};
use tracing::{debug, error, info, trace, warn};

use crate::pubsub::{
    Endpoint, Link, LinkId, QueueRegistry, SenderId, SenderOwner, SenderRef, Step, WorkQueue,
};

/// Номер соединения, выдаваемый слушателем.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Дескриптор супервизора соединения. Дёшево клонируется.
#[derive(Clone)]
pub struct ConnectionRef {
    id: ConnectionId,
    work: WorkQueue<ConnectionState>,
}

struct ConnectionState {
    id: ConnectionId,
    this: ConnectionRef,
    endpoint: Box<dyn Endpoint>,
    registry: QueueRegistry,
    senders: HashMap<LinkId, SenderRef>,
    next_link_seq: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionRef {
    pub fn spawn(
        id: ConnectionId,
        endpoint: Box<dyn Endpoint>,
        registry: QueueRegistry,
    ) -> Self {
        let work = WorkQueue::spawn_with(format!("connection:{id}"), |work| ConnectionState {
            id,
            this: ConnectionRef {
                id,
                work: work.clone(),
            },
            endpoint,
            registry,
            senders: HashMap::new(),
            next_link_seq: 1,
        });
        Self { id, work }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Клиент открыл соединение: отвечаем на handshake.
    pub fn on_connection_accepted(&self) {
        self.work.submit(|s| {
            debug!(connection = %s.id, "Connection opened");
            s.endpoint.open();
            Step::Continue
        });
    }

    /// Клиент открыл линк к адресу.
    ///
    /// Создаёт отправителя и запрашивает у реестра очередь для адреса.
    /// Отправитель начинает отслеживаться до того, как очередь будет
    /// найдена.
    pub fn on_link_opened(
        &self,
        link: Box<dyn Link>,
        address: String,
    ) {
        self.work.submit(move |s| {
            let link_id = link.id().clone();
            if s.senders.contains_key(&link_id) {
                warn!(connection = %s.id, link = %link_id, "Link already tracked, ignored");
                return Step::Continue;
            }

            let sender_id = SenderId {
                connection: s.id.0,
                seq: s.next_link_seq,
            };
            s.next_link_seq += 1;

            let sender = SenderRef::spawn(sender_id, link, Box::new(s.this.clone()));
            s.senders.insert(link_id.clone(), sender.clone());
            debug!(connection = %s.id, link = %link_id, address = %address, "Link opened");
            s.registry.resolve_queue_for_subscriber(sender, address);
            Step::Continue
        });
    }

    /// Клиент закрыл один линк.
    pub fn on_link_closed(
        &self,
        link: LinkId,
    ) {
        self.on_session_closed(vec![link]);
    }

    /// Клиент закрыл сессию; `links` это все линки этой сессии.
    ///
    /// Отправители закрываются и удаляются из набора в той же работе.
    pub fn on_session_closed(
        &self,
        links: Vec<LinkId>,
    ) {
        self.work.submit(move |s| {
            for link in links {
                // Линк сразу перестаёт отслеживаться: клиент может тут же
                // переоткрыть тот же идентификатор.
                match s.senders.remove(&link) {
                    Some(sender) => sender.notify_link_closed(),
                    None => trace!(connection = %s.id, link = %link, "Close for untracked link"),
                }
            }
            Step::Continue
        });
    }

    /// Транспорт закрыт: закрываются все отслеживаемые линки, супервизор
    /// освобождается.
    pub fn on_transport_closed(&self) {
        self.work.submit(|s| {
            info!(connection = %s.id, links = s.senders.len(), "Transport closed");
            for sender in s.senders.values() {
                sender.notify_link_closed();
            }
            s.senders.clear();
            Step::Release
        });
    }

    /// Протокольная ошибка соединения. Только логируется.
    pub fn on_protocol_error(
        &self,
        err: ProtocolError,
    ) {
        self.work.submit(move |s| {
            log_protocol_error(s.id, &err);
            Step::Continue
        });
    }

    /// Отслеживаемые линки в алфавитном порядке.
    pub async fn tracked_links(&self) -> Option<Vec<LinkId>> {
        self.work
            .query(|s| {
                let mut links: Vec<_> = s.senders.keys().cloned().collect();
                links.sort();
                links
            })
            .await
    }

    /// Отправитель, отслеживаемый для линка.
    pub async fn sender(
        &self,
        link: &str,
    ) -> Option<SenderRef> {
        let link = LinkId::from(link);
        self.work
            .query(move |s| s.senders.get(&link).cloned())
            .await
            .flatten()
    }

    pub fn is_released(&self) -> bool {
        self.work.is_released()
    }
}

fn log_protocol_error(
    connection: ConnectionId,
    err: &ProtocolError,
) {
    let code = err.status_code();
    match err.log_level() {
        LogLevel::Error => error!(%connection, %code, "Protocol error: {err}"),
        LogLevel::Warn => warn!(%connection, %code, "Protocol error: {err}"),
        LogLevel::Info => info!(%connection, %code, "Protocol error: {err}"),
        LogLevel::Debug | LogLevel::Trace => {
            debug!(%connection, %code, "Protocol error: {err}")
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для ConnectionRef
////////////////////////////////////////////////////////////////////////////////

impl SenderOwner for ConnectionRef {
    fn forget(
        &self,
        link: LinkId,
        sender: SenderId,
    ) {
        self.work.submit(move |s| {
            // Линк мог быть уже переоткрыт новым отправителем.
            if s.senders.get(&link).is_some_and(|tracked| tracked.id() == sender) {
                s.senders.remove(&link);
                trace!(connection = %s.id, link = %link, "Sender forgotten");
            }
            Step::Continue
        });
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ConnectionRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ConnectionRef")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pubsub::{MemoryTransport, TransportEvent};

    fn spawn_connection(
        id: u64,
        transport: &MemoryTransport,
        registry: &QueueRegistry,
    ) -> ConnectionRef {
        ConnectionRef::spawn(
            ConnectionId(id),
            Box::new(transport.endpoint()),
            registry.clone(),
        )
    }

    async fn settle(
        connection: &ConnectionRef,
        registry: &QueueRegistry,
    ) {
        // Несколько барьеров подряд: работа переходит между сущностями.
        for _ in 0..4 {
            let _ = connection.tracked_links().await;
            let _ = registry.stats().await;
        }
    }

    /// Тест проверяет handshake и открытие линка к запрошенному адресу.
    #[tokio::test]
    async fn test_accept_and_open_link() {
        let registry = QueueRegistry::new();
        let transport = MemoryTransport::new();
        let conn = spawn_connection(1, &transport, &registry);

        conn.on_connection_accepted();
        conn.on_link_opened(Box::new(transport.link("l1")), "tick".into());

        assert!(
            transport
                .wait_until(Duration::from_secs(1), |e| e.len() == 2)
                .await
        );
        assert_eq!(transport.events()[0], TransportEvent::ConnectionOpened);
        assert_eq!(transport.opened_address("l1").as_deref(), Some("tick"));
        assert_eq!(conn.tracked_links().await, Some(vec![LinkId::from("l1")]));
    }

    /// Тест проверяет, что закрытие сессии убирает её линки из набора.
    #[tokio::test]
    async fn test_session_close_forgets_links() {
        let registry = QueueRegistry::new();
        let transport = MemoryTransport::new();
        let conn = spawn_connection(2, &transport, &registry);

        conn.on_link_opened(Box::new(transport.link("a")), "q".into());
        conn.on_link_opened(Box::new(transport.link("b")), "q".into());
        conn.on_link_opened(Box::new(transport.link("c")), "other".into());
        settle(&conn, &registry).await;

        conn.on_session_closed(vec!["a".into(), "b".into()]);
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if conn.tracked_links().await == Some(vec![LinkId::from("c")]) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("links were not forgotten");
    }

    /// Тест проверяет, что повторное открытие того же линка игнорируется.
    #[tokio::test]
    async fn test_duplicate_link_ignored() {
        let registry = QueueRegistry::new();
        let transport = MemoryTransport::new();
        let conn = spawn_connection(3, &transport, &registry);

        conn.on_link_opened(Box::new(transport.link("l")), "x".into());
        conn.on_link_opened(Box::new(transport.link("l")), "y".into());
        settle(&conn, &registry).await;

        assert_eq!(conn.tracked_links().await.map(|l| l.len()), Some(1));
        assert_eq!(registry.queue_names().await, ["x"]);
    }

    /// Тест проверяет, что закрытый линк можно сразу переоткрыть с тем же
    /// идентификатором к другой очереди.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reopen_link_after_close() {
        let registry = QueueRegistry::new();
        let transport = MemoryTransport::new();
        let conn = spawn_connection(5, &transport, &registry);

        conn.on_link_opened(Box::new(transport.link("l")), "tick".into());
        settle(&conn, &registry).await;
        let old = conn.sender("l").await.unwrap();

        conn.on_link_closed("l".into());
        conn.on_link_opened(Box::new(transport.link("l")), "alerts".into());

        let reopened = transport
            .wait_until(Duration::from_secs(1), |events| {
                events.iter().any(|e| {
                    matches!(e, TransportEvent::LinkOpened { address, .. } if address == "alerts")
                })
            })
            .await;
        assert!(reopened, "link was not reopened");

        let current = conn.sender("l").await.unwrap();
        assert_ne!(current.id(), old.id());
        assert_eq!(registry.queue_names().await, ["alerts", "tick"]);
        assert_eq!(registry.subscriber_count("alerts").await, Some(1));

        tokio::time::timeout(Duration::from_secs(1), async {
            while !old.is_released() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("old sender was not released");
        // Запоздалый `forget` старого отправителя не трогает новый.
        settle(&conn, &registry).await;
        assert_eq!(conn.tracked_links().await, Some(vec![LinkId::from("l")]));
        assert_eq!(registry.subscriber_count("tick").await, Some(0));
    }

    /// Тест проверяет, что закрытие транспорта освобождает супервизора и
    /// всех его отправителей.
    #[tokio::test]
    async fn test_transport_close_releases_everything() {
        let registry = QueueRegistry::new();
        let transport = MemoryTransport::new();
        let conn = spawn_connection(4, &transport, &registry);

        conn.on_link_opened(Box::new(transport.link("l1")), "tick".into());
        conn.on_link_opened(Box::new(transport.link("l2")), "".into());
        settle(&conn, &registry).await;
        let s1 = conn.sender("l1").await.unwrap();
        let s2 = conn.sender("l2").await.unwrap();

        conn.on_protocol_error(ProtocolError::EmptyFrame);
        conn.on_transport_closed();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !(conn.is_released() && s1.is_released() && s2.is_released()) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("entities were not released");
        assert_eq!(registry.subscriber_count("tick").await, Some(0));
    }
}
