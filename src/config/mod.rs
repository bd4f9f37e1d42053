//! Конфигурация qmon: значения по умолчанию, переменные окружения `QMON_*`
//! и флаги командной строки, в порядке возрастания приоритета.

pub mod settings;

pub use settings::{Settings, SettingsOverrides, ENV_PREFIX};
