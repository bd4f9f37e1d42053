//! Сетевой модуль qmon.
//!
//! ## Подмодули
//!
//! - `connection_handler`: супервизор соединения, переводит события движка в
//!   операции ядра pub/sub.
//! - `listen_handler`: диспетчер приёма, создаёт супервизор на каждое
//!   соединение.
//! - `protocol`: строчный протокол (разбор и кодирование фреймов).
//! - `engine`: обслуживание одного TCP-соединения (задачи чтения и записи).
//! - `server`: сервер брокера (реестр очередей и слушатель).
//! - `banner`: стартовый баннер для консоли.

pub mod banner;
pub mod connection_handler;
pub mod engine;
pub mod listen_handler;
pub mod protocol;
pub mod server;

pub use connection_handler::{ConnectionId, ConnectionRef};
pub use engine::{ConnectionConfig, SessionTable, TcpConnection};
pub use listen_handler::{ConnectionOptions, ListenHandler};
pub use protocol::{ClientFrame, ServerFrame};
pub use server::{Server, ServerConfig};
