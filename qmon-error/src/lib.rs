//! Централизованная система ошибок qmon.
//!
//! - `status_code`: числовые коды статуса и рекомендуемые уровни логирования.
//! - `ext`: object-safe расширение [`ErrorExt`] для всех ошибок крейта.
//! - `types`: конкретные типы ошибок протокола, слушателя и конфигурации.

pub mod ext;
pub mod status_code;
pub mod types;

// Публичный экспорт всех типов ошибок, чтобы упростить доступ к ним из
// внешнего кода.
pub use ext::*;
pub use status_code::*;
pub use types::*;
