//! # Bolt Protocol Server Core
//!
//! Wire-level building blocks for serving the Bolt protocol.
//!
//! ## Submodules
//!
//! - [`packstream`] - Binary serialization of values and graph structures
//! - [`message`] - Message catalog, request reader and response writer
//! - [`handshake`] - Version negotiation
//! - [`codec`] - Chunk framing for Tokio
//! - [`error`] - Protocol errors and client-facing status codes
//!
//! ## Protocol Versions
//!
//! Bolt 1 and Bolt 2 are served. They share every message except
//! ACK_FAILURE (Bolt 1 only) and the third RUN field (Bolt 2 metadata).

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod packstream;

pub use codec::{BoltCodec, ChunkedOutput};
pub use error::{BoltError, BoltResult, Classification, HandshakeError, Status, StatusError};
pub use handshake::{BoltVersion, Handshake, BOLT_MAGIC, HANDSHAKE_RESPONSE_SIZE, HANDSHAKE_SIZE};
pub use message::{
    AuthToken, FailureMessage, FailurePolicy, InitMessage, MessageCatalog, MessageSink,
    RecordMessage, Request, RequestReader, Response, ResponseWriter, RunMessage, SuccessMessage,
};
pub use packstream::{
    Node, PackStreamDecoder, PackStreamEncoder, PackStreamError, Path, Point, Relationship,
    UnboundRelationship, Value, ValueMap,
};
