//! Tool descriptors and argument handling.

pub mod arguments;
pub mod types;

pub use arguments::ToolArguments;
pub use types::ToolDescriptor;
