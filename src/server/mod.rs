//! # Bolt Server
//!
//! Sessions, their state machine and the TCP server around them.
//!
//! - [`config`] - Server settings
//! - [`engine`] - Authentication and statement execution interfaces
//! - [`memory`] - In-memory database service
//! - [`state`] - Per-connection session state and interrupt signals
//! - [`machine`] - Request sequencing and response finalization
//! - [`connection`] - Read loop, worker and socket writer of one connection
//! - [`listener`] - Accept loop, connection registry, shutdown

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod listener;
pub mod machine;
pub mod memory;
pub mod state;

pub use config::{ServerConfig, UserConfig};
pub use connection::{serve_connection, ConnectionContext, ConnectionHandle};
pub use engine::{
    AuthResult, Authentication, BasicAuthentication, DatabaseService, NoAuthentication,
    RecordConsumer, StatementProcessor, StatementResult, TerminationFlag,
};
pub use error::{ServerError, ServerResult};
pub use listener::{BoltServer, ConnectionRegistry};
pub use machine::{BoltStateMachine, ResponseAccumulator};
pub use memory::{CannedResult, InMemoryDatabase};
pub use state::{ConnectionState, SessionSignals, SessionState};
