//! Нормализация разнородных ответов сервера.

pub mod normalizer;

pub use normalizer::*;
