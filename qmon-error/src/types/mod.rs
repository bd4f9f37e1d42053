pub mod config;
pub mod listener;
pub mod protocol;

// Публичный экспорт всех типов ошибок из вложенных модулей.
pub use config::*;
pub use listener::*;
pub use protocol::*;
