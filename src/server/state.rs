//! Per-connection session state.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::bolt::error::{BoltError, StatusError};

use super::engine::{DatabaseService, StatementProcessor, TerminationFlag};

/// Where the session is in the request sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake done, waiting for INIT.
    Connected,
    /// Authenticated and idle.
    Ready,
    /// A RUN result is waiting for PULL_ALL or DISCARD_ALL.
    Streaming,
    /// The last request failed; see the session's failure policy.
    Failed,
    /// The connection is being torn down. Nothing more is processed.
    Defunct,
}

impl ConnectionState {
    pub fn name(self) -> &'static str {
        match self {
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Ready => "READY",
            ConnectionState::Streaming => "STREAMING",
            ConnectionState::Failed => "FAILED",
            ConnectionState::Defunct => "DEFUNCT",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// SessionSignals
// ============================================================================

/// Signals shared between the read loop and the worker.
///
/// The read loop calls [`interrupt`](Self::interrupt) for every RESET before
/// queueing it; the worker calls [`resume`](Self::resume) when that RESET is
/// processed. While the counter is above zero every other request is
/// ignored.
#[derive(Debug, Default)]
pub struct SessionSignals {
    interrupt_counter: AtomicUsize,
    termination: TerminationFlag,
}

impl SessionSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the session interrupted and ask any running statement to stop.
    /// Returns the new counter value.
    pub fn interrupt(&self) -> usize {
        let count = self.interrupt_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.termination.terminate();
        count
    }

    /// Undo one interrupt, saturating at zero. Returns the new counter
    /// value.
    pub fn resume(&self) -> usize {
        match self
            .interrupt_counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt_counter.load(Ordering::SeqCst) > 0
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupt_counter.load(Ordering::SeqCst)
    }

    /// Stop running statements without interrupting the request sequence,
    /// used when the connection is shut down from outside.
    pub fn terminate(&self) {
        self.termination.terminate();
    }

    pub fn termination(&self) -> &TerminationFlag {
        &self.termination
    }
}

// ============================================================================
// SessionState
// ============================================================================

/// Mutable state of one session, owned by its worker.
pub struct SessionState {
    pub state: ConnectionState,
    /// Authenticated principal, set by INIT.
    pub principal: Option<String>,
    /// The failure that put the session into `Failed`.
    pub failure: Option<StatusError>,
    processor: Option<Box<dyn StatementProcessor>>,
    signals: Arc<SessionSignals>,
}

impl SessionState {
    pub fn new(signals: Arc<SessionSignals>) -> Self {
        Self {
            state: ConnectionState::Connected,
            principal: None,
            failure: None,
            processor: None,
            signals,
        }
    }

    pub fn signals(&self) -> &Arc<SessionSignals> {
        &self.signals
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// Database of the bound statement processor.
    pub fn bound_database(&self) -> Option<&str> {
        self.processor.as_deref().map(|p| p.database())
    }

    pub fn processor_mut(&mut self) -> Option<&mut (dyn StatementProcessor + 'static)> {
        self.processor.as_deref_mut()
    }

    /// Bind a statement processor for `database`.
    ///
    /// Binding the database already bound is a no-op. Binding a different
    /// one while a processor is held is a protocol breach.
    pub fn bind_processor(
        &mut self,
        database: &str,
        service: &dyn DatabaseService,
    ) -> Result<&mut (dyn StatementProcessor + 'static), BindError> {
        if let Some(bound) = self.bound_database() {
            if bound != database {
                return Err(BindError::Breach(BoltError::ProtocolBreach(format!(
                    "Changing database without closing the previous is not allowed. \
                     Current database name: '{}', new database name: '{}'.",
                    bound, database
                ))));
            }
        } else {
            let principal = self.principal.as_deref().unwrap_or_default();
            let processor = service
                .open_statement_processor(database, principal, self.signals.termination().clone())
                .map_err(BindError::Open)?;
            self.processor = Some(processor);
        }
        self.processor
            .as_deref_mut()
            .ok_or_else(|| BindError::Breach(BoltError::ProtocolBreach("no statement processor".to_string())))
    }

    /// Reset and release the bound processor, if any.
    pub fn release_processor(&mut self) -> Result<(), StatusError> {
        match self.processor.take() {
            Some(mut processor) => processor.reset(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("state", &self.state)
            .field("principal", &self.principal)
            .field("failure", &self.failure)
            .field("bound_database", &self.bound_database())
            .field("interrupts", &self.signals.interrupt_count())
            .finish()
    }
}

/// Why a statement processor could not be bound.
#[derive(Debug)]
pub enum BindError {
    /// Fatal sequencing violation.
    Breach(BoltError),
    /// The database service refused; reported as a normal failure.
    Open(StatusError),
}
