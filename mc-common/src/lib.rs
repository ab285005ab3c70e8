// mc-common - Wire codec for the memcached binary protocol
//
// This crate defines the frame layout shared by the client and test servers

pub mod error;
pub mod frame;
pub mod protocol;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use frame::*;
pub use protocol::*;
pub use types::*;
