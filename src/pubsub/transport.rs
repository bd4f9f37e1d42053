//! Узкие интерфейсы к протокольному движку.
//!
//! Ядро pub/sub не знает ничего о фрейминге и сокетах. Оно только вызывает
//! примитивы движка: открыть соединение, открыть линк к адресу, передать
//! сообщение транспорту. Сетевой движок (`network::engine`) реализует их
//! поверх TCP, [`MemoryTransport`] реализует их в памяти.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};

use super::Message;

/// Идентификатор линка внутри соединения.
pub type LinkId = Arc<str>;

/// Один исходящий линк подписчика.
///
/// Отправка обязана быть неблокирующей: реализация только ставит сообщение
/// в очередь транспорта.
pub trait Link: Send + 'static {
    fn id(&self) -> &LinkId;

    /// Открывает линк в сторону запрошенного адреса.
    fn open(
        &mut self,
        address: &str,
    );

    /// Передаёт сообщение транспорту для доставки.
    fn send(
        &mut self,
        message: &Message,
    );
}

/// Уровень соединения протокольного движка.
pub trait Endpoint: Send + 'static {
    /// Отвечает на handshake соединения.
    fn open(&mut self);
}

/// Событие, зафиксированное [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionOpened,
    LinkOpened { link: LinkId, address: String },
    Delivered { link: LinkId, message: Message },
}

/// Транспорт в памяти: записывает все вызовы примитивов.
///
/// Используется для встраивания брокера без сети, в тестах и бенчмарках.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    events: Arc<Mutex<Vec<TransportEvent>>>,
    changed: Arc<Notify>,
}

pub struct MemoryEndpoint {
    transport: MemoryTransport,
}

pub struct MemoryLink {
    id: LinkId,
    transport: MemoryTransport,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self) -> MemoryEndpoint {
        MemoryEndpoint {
            transport: self.clone(),
        }
    }

    pub fn link(
        &self,
        id: impl Into<LinkId>,
    ) -> MemoryLink {
        MemoryLink {
            id: id.into(),
            transport: self.clone(),
        }
    }

    /// Снимок всех событий в порядке записи.
    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    /// Сообщения, доставленные через указанный линк.
    pub fn deliveries(
        &self,
        link: &str,
    ) -> Vec<Message> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                TransportEvent::Delivered { link: l, message } if &**l == link => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Адрес, к которому был открыт линк, если он открыт.
    pub fn opened_address(
        &self,
        link: &str,
    ) -> Option<String> {
        self.events.lock().iter().find_map(|event| match event {
            TransportEvent::LinkOpened { link: l, address } if &**l == link => {
                Some(address.clone())
            }
            _ => None,
        })
    }

    /// Ждёт, пока предикат над событиями не станет истинным.
    ///
    /// Возвращает `false` по истечении `limit`.
    pub async fn wait_until<F>(
        &self,
        limit: Duration,
        mut predicate: F,
    ) -> bool
    where
        F: FnMut(&[TransportEvent]) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            let notified = self.changed.notified();
            if predicate(&self.events.lock()) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return predicate(&self.events.lock());
            }
        }
    }

    fn record(
        &self,
        event: TransportEvent,
    ) {
        self.events.lock().push(event);
        self.changed.notify_waiters();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализации примитивов движка
////////////////////////////////////////////////////////////////////////////////

impl Endpoint for MemoryEndpoint {
    fn open(&mut self) {
        self.transport.record(TransportEvent::ConnectionOpened);
    }
}

impl Link for MemoryLink {
    fn id(&self) -> &LinkId {
        &self.id
    }

    fn open(
        &mut self,
        address: &str,
    ) {
        self.transport.record(TransportEvent::LinkOpened {
            link: self.id.clone(),
            address: address.to_string(),
        });
    }

    fn send(
        &mut self,
        message: &Message,
    ) {
        self.transport.record(TransportEvent::Delivered {
            link: self.id.clone(),
            message: message.clone(),
        });
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("events", &self.events.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::MessageId;

    #[test]
    fn test_memory_link_records_in_order() {
        let transport = MemoryTransport::new();
        let mut endpoint = transport.endpoint();
        let mut link = transport.link("l1");

        endpoint.open();
        link.open("alerts");
        link.send(&Message::new(MessageId::new(1), "a"));
        link.send(&Message::new(MessageId::new(2), "b"));

        assert_eq!(transport.events()[0], TransportEvent::ConnectionOpened);
        assert_eq!(transport.opened_address("l1").as_deref(), Some("alerts"));
        let bodies: Vec<_> = transport
            .deliveries("l1")
            .iter()
            .map(|m| m.text().to_string())
            .collect();
        assert_eq!(bodies, ["a", "b"]);
        assert!(transport.deliveries("other").is_empty());
    }

    /// Тест проверяет, что ожидание просыпается при записи из другой задачи.
    #[tokio::test]
    async fn test_wait_until_wakes_up() {
        let transport = MemoryTransport::new();
        let writer = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.link("l").open("tick");
        });

        let ok = transport
            .wait_until(Duration::from_secs(1), |events| !events.is_empty())
            .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let transport = MemoryTransport::new();
        let ok = transport
            .wait_until(Duration::from_millis(20), |events| !events.is_empty())
            .await;
        assert!(!ok);
    }
}
