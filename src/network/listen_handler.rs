use std::net::SocketAddr;

use qmon_error::ListenerError;
use tracing::{error, info};

use super::connection_handler::{ConnectionId, ConnectionRef};
use crate::pubsub::{Endpoint, QueueRegistry};

/// Параметры, с которыми движок обслуживает принятое соединение.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub handler: ConnectionRef,
}

/// Диспетчер приёма: выдаёт каждому новому соединению свой супервизор.
#[derive(Debug)]
pub struct ListenHandler {
    registry: QueueRegistry,
    next_connection: u64,
}

impl ListenHandler {
    pub fn new(registry: QueueRegistry) -> Self {
        Self {
            registry,
            next_connection: 1,
        }
    }

    /// Новое входящее соединение. Создаёт для него супервизор.
    pub fn on_connection_accept(
        &mut self,
        peer: Option<SocketAddr>,
        endpoint: Box<dyn Endpoint>,
    ) -> ConnectionOptions {
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        match peer {
            Some(peer) => info!(connection = %id, %peer, "Connection accepted"),
            None => info!(connection = %id, "Connection accepted"),
        }
        ConnectionOptions {
            handler: ConnectionRef::spawn(id, endpoint, self.registry.clone()),
        }
    }

    pub fn on_listener_opened(
        &self,
        addr: SocketAddr,
    ) {
        info!(%addr, "Listening");
    }

    /// Ошибка слушателя. Логируется и возвращается вызывающему: без
    /// слушателя брокер работать не может.
    pub fn on_listener_error(
        &self,
        err: ListenerError,
    ) -> ListenerError {
        error!("Listener error: {err}");
        err
    }

    /// Сколько соединений уже принято.
    pub fn accepted(&self) -> u64 {
        self.next_connection - 1
    }
}
