//! Запросы поверх pub/sub: конечный автомат, таймеры, повторы.

pub mod coordinator;
pub mod timer;

pub use coordinator::*;
pub use timer::*;
