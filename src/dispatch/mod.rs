//! Рассылка входящих сообщений зарегистрированным наблюдателям.

pub mod registry;

pub use registry::*;
