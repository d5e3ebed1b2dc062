//! The agent loop: model turns interleaved with tool dispatch.

pub mod events;
pub mod runner;
pub mod types;

pub use events::*;
pub use runner::*;
pub use types::*;
