//! The per-connection state machine.
//!
//! Every request runs through [`BoltStateMachine::process`]: the handler
//! for its kind fills a fresh [`ResponseAccumulator`], and one finalize step
//! turns that into exactly one terminal response (SUCCESS, FAILURE, fatal
//! FAILURE or IGNORED). Records streamed by PULL_ALL are written as they
//! arrive, ahead of the terminal response.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::config::ServerConfig;
use super::engine::{Authentication, DatabaseService, RecordConsumer};
use super::state::{BindError, ConnectionState, SessionSignals, SessionState};
use crate::bolt::error::{BoltError, BoltResult, Status, StatusError};
use crate::bolt::message::{
    FailurePolicy, InitMessage, MessageCatalog, MessageSink, RecordMessage, Request, Response,
    ResponseWriter, RunMessage, SuccessMessage,
};
use crate::bolt::packstream::{Value, ValueMap};
use crate::bolt::BoltVersion;

// ============================================================================
// ResponseAccumulator
// ============================================================================

/// Outcome of one request, built up while it is handled.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    metadata: ValueMap,
    ignored: bool,
    error: Option<StatusError>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn mark_ignored(&mut self) {
        self.ignored = true;
    }

    /// Record a failure. The first one wins.
    pub fn mark_failed(&mut self, error: StatusError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn error(&self) -> Option<&StatusError> {
        self.error.as_ref()
    }

    /// The terminal response. A failure supersedes everything else.
    pub fn finalize(self) -> Response {
        match self.error {
            Some(error) => Response::from_status_error(&error),
            None if self.ignored => Response::Ignored,
            None => Response::Success(SuccessMessage::with_metadata(self.metadata)),
        }
    }
}

/// Why a handler stopped.
#[derive(Debug)]
enum Fault {
    /// Reported to the client as a FAILURE; fatal if the error says so.
    Status(StatusError),
    /// Sequencing violation; always fatal.
    Breach(BoltError),
    /// The output is gone; no response is possible.
    Output(BoltError),
}

impl From<StatusError> for Fault {
    fn from(error: StatusError) -> Self {
        Fault::Status(error)
    }
}

fn breach(request: &str, state: ConnectionState) -> Fault {
    Fault::Breach(BoltError::ProtocolBreach(format!(
        "Message '{}' cannot be handled by a session in the {} state.",
        request, state
    )))
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// StreamingConsumer
// ============================================================================

/// Forwards records to the client (PULL_ALL) or drops them (DISCARD_ALL).
struct StreamingConsumer<'a, S> {
    writer: &'a mut ResponseWriter<S>,
    acc: &'a mut ResponseAccumulator,
    pull: bool,
    output_error: Option<BoltError>,
}

impl<S: MessageSink> RecordConsumer for StreamingConsumer<'_, S> {
    fn on_record(&mut self, fields: Vec<Value>) -> Result<(), StatusError> {
        if !self.pull {
            return Ok(());
        }
        match self.writer.write(&Response::Record(RecordMessage::new(fields))) {
            Ok(()) => Ok(()),
            Err(BoltError::PackStream(e)) => Err(StatusError::new(
                Status::ExecutionFailed,
                format!("Failed to write record: {}", e),
            )),
            Err(e) => {
                let status = StatusError::fatal(Status::UnknownError, e.to_string());
                self.output_error = Some(e);
                Err(status)
            }
        }
    }

    fn on_metadata(&mut self, key: &str, value: Value) {
        self.acc.on_metadata(key, value);
    }
}

// ============================================================================
// BoltStateMachine
// ============================================================================

/// Request sequencing for one connection.
pub struct BoltStateMachine {
    connection_id: String,
    version: BoltVersion,
    policy: FailurePolicy,
    config: Arc<ServerConfig>,
    auth: Arc<dyn Authentication>,
    database: Arc<dyn DatabaseService>,
    session: SessionState,
}

impl BoltStateMachine {
    pub fn new(
        connection_id: impl Into<String>,
        version: BoltVersion,
        config: Arc<ServerConfig>,
        auth: Arc<dyn Authentication>,
        database: Arc<dyn DatabaseService>,
        signals: Arc<SessionSignals>,
    ) -> Self {
        let policy = config.failure_policy_for(MessageCatalog::for_version(version).failure_policy());
        Self {
            connection_id: connection_id.into(),
            version,
            policy,
            config,
            auth,
            database,
            session: SessionState::new(signals),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn version(&self) -> BoltVersion {
        self.version
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.session.state == ConnectionState::Defunct
    }

    /// Handle one request and write its responses.
    ///
    /// An `Err` means the output failed; the session is defunct afterwards.
    pub fn process<S: MessageSink>(
        &mut self,
        request: Request,
        writer: &mut ResponseWriter<S>,
    ) -> BoltResult<()> {
        if self.is_closed() {
            return Err(BoltError::ConnectionClosed);
        }
        debug!(
            connection_id = %self.connection_id,
            message = request.name(),
            state = %self.session.state,
            "request received"
        );

        let mut acc = ResponseAccumulator::new();
        match self.dispatch(request, &mut acc, writer) {
            Ok(()) => {}
            Err(Fault::Status(e)) => acc.mark_failed(e),
            Err(Fault::Breach(e)) => {
                error!(connection_id = %self.connection_id, error = %e, "protocol breach");
                acc.mark_failed(e.to_status_error());
            }
            Err(Fault::Output(e)) => {
                debug!(connection_id = %self.connection_id, error = %e, "output closed while streaming");
                self.close();
                return Err(e);
            }
        }
        self.finalize(acc, writer)
    }

    /// Report a request that could not be decoded and end the session.
    pub fn fail_connection<S: MessageSink>(
        &mut self,
        error: &BoltError,
        writer: &mut ResponseWriter<S>,
    ) -> BoltResult<()> {
        if self.is_closed() {
            return Err(BoltError::ConnectionClosed);
        }
        error!(connection_id = %self.connection_id, error = %error, "failed to read request");
        let mut status = error.to_status_error();
        status.fatal = true;
        let mut acc = ResponseAccumulator::new();
        acc.mark_failed(status);
        self.finalize(acc, writer)
    }

    /// Release the statement processor and stop processing.
    pub fn close(&mut self) {
        self.session.signals().terminate();
        if let Err(e) = self.session.release_processor() {
            debug!(connection_id = %self.connection_id, error = %e, "statement processor reset failed on close");
        }
        self.session.state = ConnectionState::Defunct;
    }

    fn dispatch<S: MessageSink>(
        &mut self,
        request: Request,
        acc: &mut ResponseAccumulator,
        writer: &mut ResponseWriter<S>,
    ) -> Result<(), Fault> {
        if let Request::Reset = request {
            return self.handle_reset(acc);
        }
        if self.session.signals().is_interrupted() {
            acc.mark_ignored();
            return Ok(());
        }

        if self.session.state == ConnectionState::Failed {
            match (self.policy, &request) {
                (_, Request::AckFailure) => {
                    self.clear_failure();
                    return Ok(());
                }
                (FailurePolicy::RequireAck, _) => {
                    acc.mark_ignored();
                    return Ok(());
                }
                (FailurePolicy::AutoClear, _) => self.clear_failure(),
            }
        }

        match request {
            Request::Init(init) => self.handle_init(init, acc),
            Request::Run(run) => self.handle_run(run, acc),
            Request::PullAll => self.handle_stream(true, acc, writer),
            Request::DiscardAll => self.handle_stream(false, acc, writer),
            Request::AckFailure => Err(breach("ACK_FAILURE", self.session.state)),
            Request::Reset => self.handle_reset(acc),
        }
    }

    fn clear_failure(&mut self) {
        self.session.failure = None;
        self.session.state = ConnectionState::Ready;
    }

    fn handle_init(&mut self, init: InitMessage, acc: &mut ResponseAccumulator) -> Result<(), Fault> {
        if self.session.state != ConnectionState::Connected {
            return Err(breach("INIT", self.session.state));
        }
        match self.auth.authenticate(&init.auth_token) {
            Ok(result) => {
                info!(
                    connection_id = %self.connection_id,
                    client = %init.client_name,
                    principal = %result.principal,
                    "session initialized"
                );
                acc.on_metadata("server", self.config.server_agent.as_str());
                acc.on_metadata("connection_id", self.connection_id.as_str());
                if result.credentials_expired {
                    acc.on_metadata("credentials_expired", true);
                }
                self.session.principal = Some(result.principal);
                self.session.state = ConnectionState::Ready;
                Ok(())
            }
            Err(mut e) => {
                warn!(
                    connection_id = %self.connection_id,
                    client = %init.client_name,
                    scheme = %init.auth_token.scheme,
                    error = %e,
                    "authentication failed"
                );
                e.fatal = self.config.close_on_auth_failure;
                Err(Fault::Status(e))
            }
        }
    }

    fn handle_run(&mut self, run: RunMessage, acc: &mut ResponseAccumulator) -> Result<(), Fault> {
        if self.session.state != ConnectionState::Ready {
            return Err(breach("RUN", self.session.state));
        }
        let started = Instant::now();
        let database = run
            .database()
            .unwrap_or(&self.config.default_database)
            .to_string();

        let processor = match self.session.bind_processor(&database, self.database.as_ref()) {
            Ok(processor) => processor,
            Err(BindError::Breach(e)) => return Err(Fault::Breach(e)),
            Err(BindError::Open(e)) => return Err(Fault::Status(e)),
        };
        let result = processor.run(&run.statement, &run.parameters)?;

        let fields: Vec<Value> = result.fields.into_iter().map(Value::from).collect();
        acc.on_metadata("fields", fields);
        acc.on_metadata("result_available_after", elapsed_ms(started));
        self.session.state = ConnectionState::Streaming;
        Ok(())
    }

    fn handle_stream<S: MessageSink>(
        &mut self,
        pull: bool,
        acc: &mut ResponseAccumulator,
        writer: &mut ResponseWriter<S>,
    ) -> Result<(), Fault> {
        let name = if pull { "PULL_ALL" } else { "DISCARD_ALL" };
        if self.session.state != ConnectionState::Streaming {
            return Err(breach(name, self.session.state));
        }
        let state = self.session.state;
        let processor = self
            .session
            .processor_mut()
            .ok_or_else(|| breach(name, state))?;

        let started = Instant::now();
        let mut consumer = StreamingConsumer {
            writer: &mut *writer,
            acc: &mut *acc,
            pull,
            output_error: None,
        };
        let streamed = processor.stream_result(&mut consumer);
        if let Some(e) = consumer.output_error.take() {
            return Err(Fault::Output(e));
        }
        streamed?;

        acc.on_metadata("result_consumed_after", elapsed_ms(started));
        self.session.state = ConnectionState::Ready;
        Ok(())
    }

    fn handle_reset(&mut self, acc: &mut ResponseAccumulator) -> Result<(), Fault> {
        let remaining = self.session.signals().resume();
        if remaining > 0 {
            acc.mark_ignored();
            return Ok(());
        }
        if let Err(e) = self.session.release_processor() {
            warn!(connection_id = %self.connection_id, error = %e, "statement processor reset failed");
        }
        self.session.failure = None;
        self.session.signals().termination().clear();
        self.session.state = if self.session.is_authenticated() {
            ConnectionState::Ready
        } else {
            ConnectionState::Connected
        };
        Ok(())
    }

    /// Apply the outcome to the session and write the terminal response.
    fn finalize<S: MessageSink>(
        &mut self,
        acc: ResponseAccumulator,
        writer: &mut ResponseWriter<S>,
    ) -> BoltResult<()> {
        let failure = acc.error().cloned();
        let response = acc.finalize();

        match &failure {
            Some(e) if e.fatal => self.close(),
            Some(e) if self.session.state != ConnectionState::Connected => {
                if let Some(processor) = self.session.processor_mut() {
                    if let Err(reset_error) = processor.reset() {
                        debug!(connection_id = %self.connection_id, error = %reset_error, "discarding result failed");
                    }
                }
                self.session.failure = Some(e.clone());
                self.session.state = ConnectionState::Failed;
            }
            _ => {}
        }

        if let Err(write_error) = writer.write(&response) {
            match &failure {
                Some(original) if original.is_client_disconnect() => warn!(
                    connection_id = %self.connection_id,
                    error = %write_error,
                    original = %original,
                    "client went away before the failure could be reported"
                ),
                Some(original) => error!(
                    connection_id = %self.connection_id,
                    error = %write_error,
                    original = %original,
                    "failed to report failure"
                ),
                None => debug!(
                    connection_id = %self.connection_id,
                    error = %write_error,
                    "failed to write response"
                ),
            }
            self.close();
            return Err(write_error);
        }

        debug!(
            connection_id = %self.connection_id,
            response = response.name(),
            state = %self.session.state,
            "response written"
        );
        Ok(())
    }
}

impl std::fmt::Debug for BoltStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltStateMachine")
            .field("connection_id", &self.connection_id)
            .field("version", &self.version)
            .field("policy", &self.policy)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::writer::tests::{Event, RecordingSink};
    use crate::bolt::message::{AuthToken, FailureMessage};
    use crate::bolt::packstream::{Node, PackStreamDecoder, Path, Relationship};
    use crate::server::config::UserConfig;
    use crate::server::memory::{CannedResult, InMemoryDatabase};

    struct Harness {
        machine: BoltStateMachine,
        writer: ResponseWriter<RecordingSink>,
        signals: Arc<SessionSignals>,
        seen: usize,
    }

    impl Harness {
        fn new(version: BoltVersion, config: ServerConfig, db: InMemoryDatabase) -> Self {
            let auth = config.authentication();
            let signals = Arc::new(SessionSignals::new());
            let machine = BoltStateMachine::new(
                "bolt-1",
                version,
                Arc::new(config),
                auth,
                Arc::new(db),
                Arc::clone(&signals),
            );
            Self {
                machine,
                writer: ResponseWriter::new(RecordingSink::default()),
                signals,
                seen: 0,
            }
        }

        fn v1() -> Self {
            Self::new(BoltVersion::V1, ServerConfig::default(), InMemoryDatabase::default())
        }

        fn v2() -> Self {
            Self::new(BoltVersion::V2, ServerConfig::default(), InMemoryDatabase::default())
        }

        /// Process a request and return the responses it produced.
        fn send(&mut self, request: Request) -> Vec<Response> {
            self.machine.process(request, &mut self.writer).unwrap();
            self.take()
        }

        fn take(&mut self) -> Vec<Response> {
            let committed = &self.writer.sink().committed[self.seen..];
            self.seen += committed.len();
            committed
                .iter()
                .map(|bytes| Response::decode(&mut PackStreamDecoder::new(bytes)).unwrap())
                .collect()
        }

        /// The one FAILURE written for the last request, which must have
        /// ended the session and been flushed straight away. Fatal and
        /// plain failures look the same on the wire.
        fn take_fatal(&mut self) -> FailureMessage {
            let responses = self.take();
            let f = failure(&responses).clone();
            assert!(self.machine.is_closed());
            assert_eq!(self.writer.sink().events.last(), Some(&Event::Flush));
            f
        }

        fn init(&mut self) {
            let responses = self.send(init(AuthToken::none()));
            assert!(matches!(responses[..], [Response::Success(_)]), "{responses:?}");
        }
    }

    fn init(token: AuthToken) -> Request {
        Request::Init(InitMessage::new("test-driver/1.0", token))
    }

    fn run(statement: &str) -> Request {
        Request::Run(RunMessage::new(statement))
    }

    fn run_on(statement: &str, db: &str) -> Request {
        Request::Run(RunMessage::new(statement).with_database(db))
    }

    fn success(responses: &[Response]) -> &SuccessMessage {
        match responses {
            [Response::Success(s)] => s,
            other => panic!("expected one SUCCESS, got {:?}", other),
        }
    }

    fn failure(responses: &[Response]) -> &FailureMessage {
        match responses {
            [Response::Failure(f)] => f,
            other => panic!("expected one FAILURE, got {:?}", other),
        }
    }

    #[test]
    fn test_init_metadata() {
        let mut h = Harness::v1();
        let responses = h.send(init(AuthToken::none()));
        let meta = success(&responses);
        assert!(meta.get("server").and_then(Value::as_str).unwrap().starts_with("boltd/"));
        assert_eq!(meta.get("connection_id"), Some(&Value::from("bolt-1")));
        assert!(meta.get("credentials_expired").is_none());
        assert_eq!(h.machine.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_run_pull_all_scenario() {
        let mut h = Harness::v1();
        h.init();

        let responses = h.send(run("RETURN 1"));
        let meta = success(&responses);
        assert_eq!(meta.fields(), Some(vec!["1".to_string()]));
        assert!(meta.get("result_available_after").is_some());
        assert_eq!(h.machine.state(), ConnectionState::Streaming);

        let responses = h.send(Request::PullAll);
        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0],
            Response::Record(RecordMessage::new(vec![Value::Integer(1)]))
        );
        let meta = success(&responses[1..]);
        assert!(meta.get("result_consumed_after").is_some());
        assert_eq!(h.machine.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_discard_all_drops_records() {
        let mut h = Harness::v1();
        h.init();
        h.send(run("RETURN 1, 2"));
        let responses = h.send(Request::DiscardAll);
        success(&responses);
        assert_eq!(h.machine.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_same_database_rebind_is_noop() {
        let mut h = Harness::v2();
        h.init();
        for _ in 0..2 {
            success(&h.send(run_on("RETURN 1", "neo4j")));
            h.send(Request::PullAll);
        }
        assert_eq!(h.machine.session().bound_database(), Some("neo4j"));
    }

    #[test]
    fn test_switching_database_is_breach() {
        let db = InMemoryDatabase::new(["a", "b", "neo4j"]);
        let mut h = Harness::new(BoltVersion::V2, ServerConfig::default(), db);
        h.init();
        success(&h.send(run_on("RETURN 1", "a")));
        h.send(Request::PullAll);

        h.machine.process(run_on("RETURN 1", "b"), &mut h.writer).unwrap();
        let f = h.take_fatal();
        assert_eq!(f.code, "Neo.ClientError.Request.Invalid");
        assert!(f.message.contains("'b'"));
        assert!(matches!(
            h.machine.process(Request::PullAll, &mut h.writer),
            Err(BoltError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_reset_releases_database_binding() {
        let db = InMemoryDatabase::new(["a", "b"]);
        let mut h = Harness::new(BoltVersion::V2, ServerConfig::default(), db);
        h.init();
        success(&h.send(run_on("RETURN 1", "a")));

        h.signals.interrupt();
        success(&h.send(Request::Reset));
        assert_eq!(h.machine.session().bound_database(), None);
        success(&h.send(run_on("RETURN 1", "b")));
    }

    #[test]
    fn test_failure_requires_ack_on_v1() {
        let mut h = Harness::v1();
        h.init();
        let responses = h.send(run("NOT A STATEMENT"));
        assert_eq!(failure(&responses).code, "Neo.ClientError.Statement.SyntaxError");
        assert_eq!(h.machine.state(), ConnectionState::Failed);

        assert_eq!(h.send(run("RETURN 1")), vec![Response::Ignored]);
        assert_eq!(h.send(Request::PullAll), vec![Response::Ignored]);

        success(&h.send(Request::AckFailure));
        assert_eq!(h.machine.state(), ConnectionState::Ready);
        success(&h.send(run("RETURN 1")));
    }

    #[test]
    fn test_failure_auto_clears_on_v2() {
        let mut h = Harness::v2();
        h.init();
        failure(&h.send(run("NOT A STATEMENT")));
        assert_eq!(h.machine.state(), ConnectionState::Failed);

        success(&h.send(run("RETURN 1")));
        assert_eq!(h.machine.state(), ConnectionState::Streaming);
    }

    #[test]
    fn test_failure_policy_override() {
        let config = ServerConfig::default().with_failure_policy(FailurePolicy::AutoClear);
        let mut h = Harness::new(BoltVersion::V1, config, InMemoryDatabase::default());
        assert_eq!(h.machine.failure_policy(), FailurePolicy::AutoClear);
        h.init();
        failure(&h.send(run("NOT A STATEMENT")));
        success(&h.send(run("RETURN 1")));
    }

    #[test]
    fn test_run_while_streaming_is_breach() {
        let mut h = Harness::v1();
        h.init();
        success(&h.send(run("RETURN 1")));
        // RUN while a result is pending
        h.machine.process(run("RETURN 2"), &mut h.writer).unwrap();
        assert!(h.take_fatal().message.contains("STREAMING"));
    }

    #[test]
    fn test_ignored_while_interrupted() {
        let mut h = Harness::v1();
        h.init();
        h.signals.interrupt();
        h.signals.interrupt();

        assert_eq!(h.send(run("RETURN 1")), vec![Response::Ignored]);
        assert_eq!(h.send(Request::Reset), vec![Response::Ignored]);
        assert_eq!(h.send(run("RETURN 1")), vec![Response::Ignored]);
        success(&h.send(Request::Reset));

        assert!(!h.signals.is_interrupted());
        assert!(!h.signals.termination().is_terminated());
        success(&h.send(run("RETURN 1")));
    }

    #[test]
    fn test_reset_clears_failure() {
        let mut h = Harness::v1();
        h.init();
        failure(&h.send(run("NOT A STATEMENT")));
        h.signals.interrupt();
        success(&h.send(Request::Reset));
        assert_eq!(h.machine.state(), ConnectionState::Ready);
        assert!(h.machine.session().failure.is_none());
    }

    #[test]
    fn test_reset_before_init_stays_connected() {
        let mut h = Harness::v1();
        success(&h.send(Request::Reset));
        assert_eq!(h.machine.state(), ConnectionState::Connected);
        h.init();
    }

    #[test]
    fn test_run_before_init_is_breach() {
        let mut h = Harness::v1();
        h.machine.process(run("RETURN 1"), &mut h.writer).unwrap();
        assert!(h.take_fatal().message.contains("CONNECTED"));
    }

    #[test]
    fn test_ack_failure_without_failure_is_breach() {
        let mut h = Harness::v1();
        h.init();
        h.machine.process(Request::AckFailure, &mut h.writer).unwrap();
        assert!(h.take_fatal().message.contains("ACK_FAILURE"));
    }

    #[test]
    fn test_auth_failure_closes_by_default() {
        let config = ServerConfig::default().with_user(UserConfig::new("neo4j", "secret"));
        let mut h = Harness::new(BoltVersion::V1, config, InMemoryDatabase::default());
        h.machine
            .process(init(AuthToken::basic("neo4j", "wrong")), &mut h.writer)
            .unwrap();
        let f = h.take_fatal();
        assert_eq!(f.code, "Neo.ClientError.Security.Unauthorized");
        assert_eq!(h.writer.sink().flushed, 1);
    }

    #[test]
    fn test_auth_failure_can_keep_connection() {
        let config = ServerConfig::default()
            .with_user(UserConfig::new("neo4j", "secret"))
            .with_close_on_auth_failure(false);
        let mut h = Harness::new(BoltVersion::V1, config, InMemoryDatabase::default());

        let responses = h.send(init(AuthToken::basic("neo4j", "wrong")));
        assert_eq!(failure(&responses).code, "Neo.ClientError.Security.Unauthorized");
        assert_eq!(h.machine.state(), ConnectionState::Connected);

        success(&h.send(init(AuthToken::basic("neo4j", "secret"))));
        assert_eq!(h.machine.session().principal.as_deref(), Some("neo4j"));
    }

    #[test]
    fn test_credentials_expired_metadata() {
        let mut user = UserConfig::new("neo4j", "secret");
        user.credentials_expired = true;
        let config = ServerConfig::default().with_user(user);
        let mut h = Harness::new(BoltVersion::V1, config, InMemoryDatabase::default());
        let responses = h.send(init(AuthToken::basic("neo4j", "secret")));
        assert_eq!(
            success(&responses).get("credentials_expired"),
            Some(&Value::Boolean(true))
        );
    }

    #[test]
    fn test_unknown_database_is_recoverable() {
        let mut h = Harness::v2();
        h.init();
        let responses = h.send(run_on("RETURN 1", "missing"));
        assert_eq!(failure(&responses).code, "Neo.ClientError.Database.DatabaseNotFound");
        success(&h.send(run("RETURN 1")));
    }

    #[test]
    fn test_record_encode_failure_mid_stream() {
        let a = Node::new(1, vec![], ValueMap::new());
        let b = Node::new(2, vec![], ValueMap::new());
        let broken = Path::new(vec![a, b], vec![Relationship::new(5, 8, 9, "X", ValueMap::new())]);
        let db = InMemoryDatabase::default().with_result(
            "MATCH p RETURN p",
            CannedResult::new(vec!["p"])
                .with_record(vec![Value::Integer(1)])
                .with_record(vec![Value::from("x"), Value::Path(broken), Value::Integer(3)])
                .with_record(vec![Value::Integer(3)]),
        );
        let mut h = Harness::new(BoltVersion::V1, ServerConfig::default(), db);
        h.init();
        success(&h.send(run("MATCH p RETURN p")));

        let responses = h.send(Request::PullAll);
        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0],
            Response::Record(RecordMessage::new(vec![Value::Integer(1)]))
        );
        assert_eq!(
            failure(&responses[1..]).code,
            "Neo.DatabaseError.Statement.ExecutionFailed"
        );
        assert!(h.writer.sink().current.is_empty());
        assert_eq!(h.machine.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_decode_error_is_fatal() {
        let mut h = Harness::v1();
        h.init();
        let err = BoltError::InvalidMessageFormat("Unknown message signature 0x99".to_string());
        h.machine.fail_connection(&err, &mut h.writer).unwrap();
        let f = h.take_fatal();
        assert_eq!(f.code, "Neo.ClientError.Request.InvalidFormat");
        assert!(f.message.contains("0x99"));
    }

    /// Sink whose transport is gone.
    #[derive(Default)]
    struct ClosedSink(bytes::BytesMut);

    impl MessageSink for ClosedSink {
        fn begin_message(&mut self) {
            self.0.clear();
        }

        fn buffer(&mut self) -> &mut bytes::BytesMut {
            &mut self.0
        }

        fn message_succeeded(&mut self) -> BoltResult<()> {
            Err(BoltError::OutputClosed)
        }

        fn message_failed(&mut self) {}

        fn flush(&mut self) -> BoltResult<()> {
            Err(BoltError::OutputClosed)
        }
    }

    #[test]
    fn test_write_failure_closes_session() {
        let signals = Arc::new(SessionSignals::new());
        let mut machine = BoltStateMachine::new(
            "bolt-2",
            BoltVersion::V1,
            Arc::new(ServerConfig::default()),
            ServerConfig::default().authentication(),
            Arc::new(InMemoryDatabase::default()),
            signals,
        );
        let mut writer = ResponseWriter::new(ClosedSink::default());
        let err = machine.process(Request::Reset, &mut writer).unwrap_err();
        assert!(matches!(err, BoltError::OutputClosed));
        assert!(machine.is_closed());
    }

    struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` and return what it logged on this thread, formatted.
    fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let buffer = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || LogBuffer(Arc::clone(&sink)))
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .finish();
        let value = tracing::subscriber::with_default(subscriber, f);
        let logs = String::from_utf8(buffer.lock().clone()).unwrap();
        (value, logs)
    }

    fn log_line<'a>(logs: &'a str, needle: &str) -> &'a str {
        logs.lines()
            .find(|line| line.contains(needle))
            .unwrap_or_else(|| panic!("no log line with {needle:?} in:\n{logs}"))
    }

    #[test]
    fn test_unreported_disconnect_failure_is_a_warning() {
        let mut h = Harness::v1();
        h.init();
        // the client went away; its statements are being terminated
        h.signals.terminate();

        let mut closed = ResponseWriter::new(ClosedSink::default());
        let (result, logs) = capture_logs(|| h.machine.process(run("RETURN 1"), &mut closed));
        assert!(matches!(result, Err(BoltError::OutputClosed)));
        assert!(h.machine.is_closed());

        let line = log_line(&logs, "Transaction.Terminated");
        assert!(line.contains("WARN"), "{line}");
        assert!(line.contains("client went away"), "{line}");
        assert!(!logs.contains("ERROR"), "{logs}");
    }

    #[test]
    fn test_unreported_failure_is_an_error() {
        let mut h = Harness::v1();
        h.init();

        let mut closed = ResponseWriter::new(ClosedSink::default());
        let (result, logs) =
            capture_logs(|| h.machine.process(run("NOT A STATEMENT"), &mut closed));
        assert!(matches!(result, Err(BoltError::OutputClosed)));
        assert!(h.machine.is_closed());

        let line = log_line(&logs, "failed to report failure");
        assert!(line.contains("ERROR"), "{line}");
        assert!(line.contains("original=Neo.ClientError.Statement.SyntaxError"), "{line}");
        assert!(line.contains("error=Output closed"), "{line}");
    }

    #[test]
    fn test_accumulator_failure_supersedes() {
        let mut acc = ResponseAccumulator::new();
        acc.on_metadata("fields", Vec::<Value>::new());
        acc.mark_ignored();
        acc.mark_failed(StatusError::new(Status::SyntaxError, "first"));
        acc.mark_failed(StatusError::new(Status::ExecutionFailed, "second"));
        match acc.finalize() {
            Response::Failure(f) => assert_eq!(f.message, "first"),
            other => panic!("unexpected {:?}", other),
        }

        let mut acc = ResponseAccumulator::new();
        acc.mark_ignored();
        assert_eq!(acc.finalize(), Response::Ignored);
    }
}
