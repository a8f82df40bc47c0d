//! Protocol implementations.

pub mod frame;

// Re-export common types
pub use frame::{
    CMD_SUCCESSFUL, Command, CommandFrame, ResponseFrame, build_request, checksum,
    validate_response,
};
