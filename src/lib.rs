//! # Bolt Server
//!
//! Server side of the Bolt protocol (versions 1 and 2): the PackStream codec
//! with graph structures, the message catalog, and the per-connection
//! state machine that sequences requests and responses.
//!
//! ## Features
//!
//! - **PackStream** - Byte-exact encoding of values, nodes, relationships,
//!   paths and points, with sized and streamed containers
//! - **Atomic responses** - A response that fails to encode never leaves
//!   partial bytes on the wire
//! - **Session state machine** - INIT, RUN, PULL_ALL, DISCARD_ALL, RESET and
//!   ACK_FAILURE with per-version failure handling and nested interrupts
//! - **Async I/O** - Built on Tokio; statements run on a blocking worker per
//!   connection so RESET is seen while a statement is running
//!
//! ## Running a Server
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bolt_server::server::{BoltServer, InMemoryDatabase, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default().with_listen_address("127.0.0.1:7687");
//!     let auth = config.authentication();
//!     let server = BoltServer::bind(config, auth, Arc::new(InMemoryDatabase::default())).await?;
//!
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Encoding Values
//!
//! ```rust
//! use bolt_server::bolt::packstream::{decode, encode, Value};
//!
//! let value = Value::List(vec![Value::Integer(1), Value::from("two")]);
//! let bytes = encode(&value).unwrap();
//! assert_eq!(&bytes[..], &[0x92, 0x01, 0x83, b't', b'w', b'o']);
//! assert_eq!(decode(&bytes).unwrap(), value);
//! ```
//!
//! ## Modules
//!
//! - [`bolt`] - Wire protocol: PackStream, messages, handshake, framing
//! - [`server`] - Session state machine, connections and the TCP server

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bolt;
pub mod server;

pub use bolt::{
    BoltError, BoltResult, BoltVersion, Node, Path, Point, Relationship, Request, Response,
    Status, StatusError, Value, ValueMap,
};
pub use server::{
    BoltServer, BoltStateMachine, DatabaseService, InMemoryDatabase, ServerConfig, ServerError,
    ServerResult, StatementProcessor,
};
