//! Внутрипроцессная подсистема Publish–Subscribe.
//!
//! - `broker`: регистрация топиков и фильтров, доставка сообщений.
//! - `message`: входящее сообщение `(topic, payload)`.
//! - `subscriber`: приёмник сообщений для одной подписки.

pub mod broker;
pub mod message;
pub mod subscriber;

pub use broker::*;
pub use message::*;
pub use subscriber::*;
