//! Bolt protocol messages.
//!
//! Requests are decoded by [`RequestReader`] against a version-specific
//! [`MessageCatalog`]; responses are encoded by [`ResponseWriter`] into a
//! [`MessageSink`].

pub mod catalog;
pub mod reader;
pub mod request;
pub mod response;
pub mod writer;

pub use catalog::{CatalogEntry, FailurePolicy, MessageCatalog, RequestKind};
pub use reader::RequestReader;
pub use request::*;
pub use response::*;
pub use writer::{MessageSink, ResponseWriter};

/// Bolt message signatures.
pub mod signature {
    /// INIT request (0x01)
    pub const INIT: u8 = 0x01;
    /// ACK_FAILURE request (0x0E), Bolt 1 only
    pub const ACK_FAILURE: u8 = 0x0E;
    /// RESET request (0x0F)
    pub const RESET: u8 = 0x0F;
    /// RUN request (0x10)
    pub const RUN: u8 = 0x10;
    /// DISCARD_ALL request (0x2F)
    pub const DISCARD_ALL: u8 = 0x2F;
    /// PULL_ALL request (0x3F)
    pub const PULL_ALL: u8 = 0x3F;

    /// SUCCESS response (0x70)
    pub const SUCCESS: u8 = 0x70;
    /// RECORD response (0x71)
    pub const RECORD: u8 = 0x71;
    /// IGNORED response (0x7E)
    pub const IGNORED: u8 = 0x7E;
    /// FAILURE response (0x7F)
    pub const FAILURE: u8 = 0x7F;
}
