use std::fmt;

use num_enum::TryFromPrimitive;

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки и конфигурация
/// - 2xxx: Ошибки маршрутизации (очереди, линки, сессии)
/// - 6xxx: Сеть / IO
/// - 8xxx: Протокольные ошибки (фреймы)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Internal = 1003,
    InvalidArgs = 1004,
    InvalidConfig = 1006,

    // === 2xxx: Маршрутизация ===
    NotFound = 2000,
    AlreadyExists = 2001,

    // === 6xxx: Сеть/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    BindFailed = 6008,
    AcceptFailed = 6009,

    // === 8xxx: Протокол ===
    InvalidFrame = 8000,
    InvalidCommand = 8001,
    InvalidUtf8 = 8004,
    SizeLimit = 8007,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Ошибка протокола (диапазон 8xxx).
    pub fn is_protocol_error(&self) -> bool {
        (8000..=8999).contains(&self.code())
    }

    /// Ошибка сети или ввода-вывода (диапазон 6xxx).
    pub fn is_network_error(&self) -> bool {
        (6000..=6999).contains(&self.code())
    }

    /// Ошибка, после которой процесс не может продолжать работу.
    ///
    /// Сломанный accept-путь слушателя никто другой не заметит и не
    /// восстановит, поэтому он фатален.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BindFailed | Self::AcceptFailed | Self::InvalidConfig
        )
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::AlreadyExists => LogLevel::Debug,
            Self::InvalidArgs | Self::ConnectionClosed => LogLevel::Info,
            Self::InvalidFrame | Self::InvalidCommand | Self::InvalidUtf8 | Self::SizeLimit => {
                LogLevel::Warn
            }
            Self::Internal
            | Self::InvalidConfig
            | Self::BindFailed
            | Self::AcceptFailed => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что код и обратное преобразование из u32 совпадают.
    #[test]
    fn test_code_roundtrip_known_values() {
        assert_eq!(StatusCode::InvalidFrame.code(), 8000);
        assert_eq!(StatusCode::from_u32(6009), Some(StatusCode::AcceptFailed));
        assert_eq!(StatusCode::from_u32(4242), None);
    }

    /// Тест проверяет классификацию диапазонов.
    #[test]
    fn test_ranges() {
        assert!(StatusCode::InvalidUtf8.is_protocol_error());
        assert!(!StatusCode::Io.is_protocol_error());
        assert!(StatusCode::ConnectionClosed.is_network_error());
        assert!(!StatusCode::NotFound.is_network_error());
    }

    /// Тест проверяет, что только ошибки слушателя и конфигурации фатальны.
    #[test]
    fn test_fatal_codes() {
        assert!(StatusCode::AcceptFailed.is_fatal());
        assert!(StatusCode::BindFailed.is_fatal());
        assert!(StatusCode::InvalidConfig.is_fatal());
        assert!(!StatusCode::InvalidFrame.is_fatal());
        assert!(!StatusCode::NotFound.is_fatal());
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(StatusCode::NotFound.log_level(), LogLevel::Debug);
        assert_eq!(StatusCode::InvalidCommand.log_level(), LogLevel::Warn);
        assert_eq!(StatusCode::AcceptFailed.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_display_is_numeric() {
        assert_eq!(StatusCode::SizeLimit.to_string(), "8007");
    }
}
