//! Ядро Publish–Subscribe.
//!
//! Каждая сущность брокера живёт в собственной последовательной очереди
//! работы и общается с остальными только через неё:
//!
//! - `work_queue`: примитив сущности (очередь работы поверх задачи tokio).
//! - `registry`: реестр очередей, точка публикации и выдачи номеров.
//! - `queue`: именованная очередь и рассылка подписчикам.
//! - `sender`: подписчик, связывающий линк с очередью.
//! - `message`: сообщение и его идентификатор.
//! - `transport`: узкие интерфейсы к протокольному движку.
//!
//! Публичный API переэкспортирует основные типы всех подмодулей.

pub mod message;
pub mod queue;
pub mod registry;
pub mod sender;
pub mod transport;
pub mod work_queue;

pub use message::{Message, MessageId};
pub use queue::QueueRef;
pub use registry::{QueueRegistry, RegistryStats, NONAME_QUEUE};
pub use sender::{SenderId, SenderOwner, SenderRef};
pub use transport::{
    Endpoint, Link, LinkId, MemoryEndpoint, MemoryLink, MemoryTransport, TransportEvent,
};
pub use work_queue::{Step, WorkQueue};
