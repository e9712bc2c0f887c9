//! Учёт подписок на общем соединении.

pub mod tracker;

pub use tracker::*;
