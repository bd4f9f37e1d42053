use std::{future::Future, net::SocketAddr, sync::Arc};

use qmon_error::ListenerError;
use tokio::net::TcpListener;
use tracing::info;

use super::{
    engine::{ConnectionConfig, TcpConnection},
    listen_handler::ListenHandler,
};
use crate::pubsub::QueueRegistry;

/// Конфигурация сервера.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Идентификатор контейнера в ответе `OPEN`
    pub container_id: String,
    pub connection: ConnectionConfig,
}

/// Сервер брокера: владеет реестром очередей и слушателем.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: QueueRegistry,
    listen_handler: ListenHandler,
    container: Arc<str>,
    connection: ConnectionConfig,
}

impl Server {
    /// Создаёт реестр и открывает слушатель на `<host>:<port>`.
    pub async fn bind(config: ServerConfig) -> Result<Self, ListenerError> {
        let registry = QueueRegistry::new();
        let listen_handler = ListenHandler::new(registry.clone());
        let addr = format!("{}:{}", config.host, config.port);

        let bound = TcpListener::bind(&addr)
            .await
            .and_then(|listener| listener.local_addr().map(|local| (listener, local)));
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                return Err(listen_handler.on_listener_error(ListenerError::Bind { addr, source }))
            }
        };
        listen_handler.on_listener_opened(local_addr);

        Ok(Self {
            listener,
            local_addr,
            registry,
            listen_handler,
            container: Arc::from(config.container_id),
            connection: config.connection,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Дескриптор для внешних производителей сообщений.
    pub fn publisher(&self) -> QueueRegistry {
        self.registry.clone()
    }

    /// Принимает соединения, пока слушатель не вернёт ошибку.
    pub async fn run(mut self) -> Result<(), ListenerError> {
        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(source) => {
                    return Err(self
                        .listen_handler
                        .on_listener_error(ListenerError::Accept { source }))
                }
            };

            let connection = TcpConnection::new(socket, peer, self.connection.clone());
            let endpoint = connection.endpoint(self.container.clone());
            let options = self
                .listen_handler
                .on_connection_accept(Some(peer), Box::new(endpoint));
            tokio::spawn(connection.run(options.handler));
        }
    }

    /// Как [`Server::run`], но завершается штатно по сигналу `shutdown`.
    pub async fn run_until<F>(
        self,
        shutdown: F,
    ) -> Result<(), ListenerError>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr;
        tokio::select! {
            result = self.run() => result,
            _ = shutdown => {
                info!(%addr, "Listener stopped");
                Ok(())
            }
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5672,
            container_id: "qmon".to_string(),
            connection: ConnectionConfig::default(),
        }
    }
}
