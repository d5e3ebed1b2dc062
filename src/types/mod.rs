//! Core types for toolrelay.

pub mod generation;
pub mod message;

pub use generation::*;
pub use message::*;
