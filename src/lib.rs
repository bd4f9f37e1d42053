/// Server configuration: defaults, `QMON_*` environment, CLI overrides.
pub mod config;
/// Error types: re-exports of `qmon-error` plus logging errors.
pub mod error;
/// Logging (tracing subscriber, console and rolling file sinks).
pub mod logging;
/// External producer: periodic tick and CPU load alert.
pub mod monitor;
/// Network stack: line protocol engine, connection supervisor, listener.
pub mod network;
/// Pub/Sub core: registry, queues, senders, per-entity work queues.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings.
pub use config::{Settings, SettingsOverrides};
/// Operation errors.
pub use error::{ConfigError, ErrorExt, ListenerError, LoggingError, ProtocolError, StatusCode};
/// Logging setup.
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingHandle};
/// Monitor.
pub use monitor::{LoadEdge, LoadProbe, LoadTrigger, Monitor, MonitorConfig, SystemLoadProbe};
/// Network server and handlers.
pub use network::{
    ConnectionId, ConnectionOptions, ConnectionRef, ListenHandler, Server, ServerConfig,
};
/// Pub/Sub API.
pub use pubsub::{
    Message, MessageId, QueueRef, QueueRegistry, RegistryStats, SenderId, SenderRef, WorkQueue,
    NONAME_QUEUE,
};
