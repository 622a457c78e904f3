//! Collaborator interfaces consumed by the state machine.
//!
//! Statement execution, result iteration and authentication live outside
//! the protocol layer. The session talks to them only through the traits
//! here, all of which are synchronous: they run on the connection's worker,
//! never on the read loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bolt::error::{Status, StatusError};
use crate::bolt::message::AuthToken;
use crate::bolt::packstream::{Value, ValueMap};

use super::config::UserConfig;

// ============================================================================
// TerminationFlag
// ============================================================================

/// Shared flag telling a running statement to stop.
///
/// Raised by the read loop when a RESET arrives and by server shutdown;
/// cleared once the session has fully reset.
#[derive(Debug, Clone, Default)]
pub struct TerminationFlag(Arc<AtomicBool>);

impl TerminationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminate(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error to raise when a statement notices the flag.
    pub fn terminated_error() -> StatusError {
        StatusError::new(
            Status::TransactionTerminated,
            "The transaction has been terminated.",
        )
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub principal: String,
    pub credentials_expired: bool,
}

impl AuthResult {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            credentials_expired: false,
        }
    }
}

/// Checks the auth token carried by INIT.
pub trait Authentication: Send + Sync {
    fn authenticate(&self, token: &AuthToken) -> Result<AuthResult, StatusError>;
}

fn unauthorized() -> StatusError {
    StatusError::new(
        Status::Unauthorized,
        "The client is unauthorized due to authentication failure.",
    )
}

fn unsupported_scheme(scheme: &str) -> StatusError {
    StatusError::new(
        Status::Unauthorized,
        format!("Unsupported authentication scheme '{}'", scheme),
    )
}

/// Accepts any `none` or `basic` token without checking credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthentication;

impl Authentication for NoAuthentication {
    fn authenticate(&self, token: &AuthToken) -> Result<AuthResult, StatusError> {
        match token.scheme.as_str() {
            "none" | "basic" => Ok(AuthResult::new(
                token.principal.clone().unwrap_or_default(),
            )),
            other => Err(unsupported_scheme(other)),
        }
    }
}

/// Username/password check against a fixed user table.
#[derive(Debug, Clone, Default)]
pub struct BasicAuthentication {
    users: HashMap<String, UserConfig>,
}

impl BasicAuthentication {
    pub fn new(users: impl IntoIterator<Item = UserConfig>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.name.clone(), u)).collect(),
        }
    }
}

impl Authentication for BasicAuthentication {
    fn authenticate(&self, token: &AuthToken) -> Result<AuthResult, StatusError> {
        if token.scheme != "basic" {
            return Err(unsupported_scheme(&token.scheme));
        }
        let (Some(principal), Some(credentials)) = (&token.principal, &token.credentials) else {
            return Err(unauthorized());
        };
        match self.users.get(principal) {
            Some(user) if user.password == *credentials => Ok(AuthResult {
                principal: principal.clone(),
                credentials_expired: user.credentials_expired,
            }),
            _ => Err(unauthorized()),
        }
    }
}

// ============================================================================
// Statement execution
// ============================================================================

/// Receives the rows and completion metadata of one result.
pub trait RecordConsumer {
    /// One row. An error stops the stream and becomes the request's failure.
    fn on_record(&mut self, fields: Vec<Value>) -> Result<(), StatusError>;

    fn on_metadata(&mut self, key: &str, value: Value);
}

/// Outcome of RUN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    pub fields: Vec<String>,
}

/// Runs statements against one database on behalf of one session.
pub trait StatementProcessor: Send {
    /// Database this processor is bound to.
    fn database(&self) -> &str;

    /// Prepare a statement. Its result stays pending until streamed.
    fn run(&mut self, statement: &str, parameters: &ValueMap) -> Result<StatementResult, StatusError>;

    /// Feed the pending result into `consumer`. Whether records reach the
    /// client or are dropped is the consumer's business.
    fn stream_result(&mut self, consumer: &mut dyn RecordConsumer) -> Result<(), StatusError>;

    /// Drop any pending result and release held resources.
    fn reset(&mut self) -> Result<(), StatusError>;
}

/// Opens statement processors.
pub trait DatabaseService: Send + Sync {
    /// Product version reported in logs.
    fn version(&self) -> &str;

    fn open_statement_processor(
        &self,
        database: &str,
        principal: &str,
        termination: TerminationFlag,
    ) -> Result<Box<dyn StatementProcessor>, StatusError>;
}
