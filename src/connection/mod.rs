//! Жизненный цикл общего соединения.

pub mod manager;
pub mod state;

pub use manager::*;
pub use state::*;
