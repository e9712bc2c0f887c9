//! Загрузка настроек из значений по умолчанию, файла и окружения.

pub mod settings;

pub use settings::*;
