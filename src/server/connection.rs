//! One Bolt connection.
//!
//! After the handshake a connection runs three parts:
//!
//! - the read loop (this task): de-chunks frames, decodes requests and
//!   queues them; a RESET interrupts the session before it is queued.
//! - the worker (`spawn_blocking`): owns the state machine and processes
//!   queued requests strictly in arrival order, flushing output whenever
//!   the queue runs dry.
//! - the socket writer: copies flushed output to the socket.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace, warn};

use super::config::ServerConfig;
use super::engine::{Authentication, DatabaseService};
use super::machine::BoltStateMachine;
use super::state::SessionSignals;
use crate::bolt::codec::{BoltCodec, ChunkedOutput};
use crate::bolt::error::{BoltError, BoltResult, HandshakeError};
use crate::bolt::handshake::{BoltVersion, Handshake, HANDSHAKE_SIZE};
use crate::bolt::message::{MessageCatalog, Request, RequestReader, ResponseWriter};

/// Flushed output batches queued for the socket writer. Each batch is at
/// most about one flush threshold, plus one message.
const OUTPUT_QUEUE_CAPACITY: usize = 16;

/// How long a connection that is going away waits for its worker before
/// dropping unsent output.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared services every connection needs.
#[derive(Clone)]
pub struct ConnectionContext {
    pub config: Arc<ServerConfig>,
    pub auth: Arc<dyn Authentication>,
    pub database: Arc<dyn DatabaseService>,
}

/// Registry entry for a live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: String,
    remote: SocketAddr,
    signals: Arc<SessionSignals>,
}

impl ConnectionHandle {
    pub fn new(id: impl Into<String>, remote: SocketAddr) -> Self {
        Self {
            id: id.into(),
            remote,
            signals: Arc::new(SessionSignals::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn signals(&self) -> &Arc<SessionSignals> {
        &self.signals
    }

    /// Stop whatever statement the connection is running.
    pub fn terminate(&self) {
        self.signals.terminate();
    }
}

/// Unit of work queued for the worker.
#[derive(Debug)]
enum Job {
    Request(Request),
    /// The next message could not be read; report it and stop.
    Unreadable(BoltError),
}

/// Serve one connection until the client leaves, the session ends or
/// `shutdown` fires.
pub async fn serve_connection<S>(
    mut stream: S,
    handle: Arc<ConnectionHandle>,
    ctx: ConnectionContext,
    mut shutdown: watch::Receiver<bool>,
) -> BoltResult<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    S: Unpin,
{
    let version = negotiate(&mut stream, &handle, &ctx.config).await?;
    info!(connection_id = %handle.id, remote = %handle.remote, version = %version, "protocol version negotiated");

    let (read_half, write_half) = tokio::io::split(stream);

    let (out_tx, out_rx) = mpsc::channel::<Bytes>(OUTPUT_QUEUE_CAPACITY);
    let socket_writer = tokio::spawn(write_output(write_half, out_rx));

    let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
    let machine = BoltStateMachine::new(
        handle.id.clone(),
        version,
        Arc::clone(&ctx.config),
        Arc::clone(&ctx.auth),
        Arc::clone(&ctx.database),
        Arc::clone(&handle.signals),
    );
    let output = ChunkedOutput::new(out_tx, ctx.config.max_chunk_size, ctx.config.output_flush_threshold);
    let mut worker = tokio::task::spawn_blocking(move || run_worker(machine, job_rx, output));

    let reader = RequestReader::new(MessageCatalog::for_version(version));
    let mut frames = FramedRead::new(
        read_half,
        BoltCodec::with_limits(ctx.config.max_message_size, ctx.config.max_chunk_size),
    );

    let mut bounded_drain = false;
    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(frame)) => {
                    let job = match reader.read(&frame) {
                        Ok(request) => {
                            if let Request::Reset = request {
                                let count = handle.signals.interrupt();
                                trace!(connection_id = %handle.id, interrupts = count, "session interrupted");
                            }
                            Job::Request(request)
                        }
                        Err(e) => Job::Unreadable(e),
                    };
                    let unreadable = matches!(job, Job::Unreadable(_));
                    if job_tx.send(job).is_err() || unreadable {
                        break;
                    }
                }
                Some(Err(e @ BoltError::MessageTooLarge { .. })) => {
                    if job_tx.send(Job::Unreadable(e)).is_err() {
                        debug!(connection_id = %handle.id, "worker gone before oversized message could be reported");
                    }
                    break;
                }
                Some(Err(e)) => {
                    debug!(connection_id = %handle.id, error = %e, "read failed");
                    handle.signals.terminate();
                    bounded_drain = true;
                    break;
                }
                None => {
                    debug!(connection_id = %handle.id, "client closed the connection");
                    handle.signals.terminate();
                    bounded_drain = true;
                    break;
                }
            },
            _ = job_tx.closed() => break,
            _ = shutdown.changed() => {
                debug!(connection_id = %handle.id, "server shutting down");
                handle.signals.terminate();
                bounded_drain = true;
                break;
            }
        }
    }
    drop(job_tx);

    // A client that stopped reading keeps the worker blocked on output.
    let worker_result = if bounded_drain {
        match timeout(SHUTDOWN_GRACE, &mut worker).await {
            Ok(result) => result,
            Err(_) => {
                debug!(connection_id = %handle.id, "output stalled, dropping it");
                socket_writer.abort();
                worker.await
            }
        }
    } else {
        worker.await
    };
    if let Err(e) = worker_result {
        warn!(connection_id = %handle.id, error = %e, "worker task failed");
    }
    match socket_writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(connection_id = %handle.id, error = %e, "socket write failed"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!(connection_id = %handle.id, error = %e, "socket writer task failed"),
    }
    Ok(())
}

async fn negotiate<S>(
    stream: &mut S,
    handle: &ConnectionHandle,
    config: &ServerConfig,
) -> BoltResult<BoltVersion>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut data = [0u8; HANDSHAKE_SIZE];
    match timeout(config.handshake_timeout, stream.read_exact(&mut data)).await {
        Err(_) => {
            warn!(connection_id = %handle.id, remote = %handle.remote, "handshake timed out");
            return Err(HandshakeError::Timeout.into());
        }
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(HandshakeError::ConnectionClosed.into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(_)) => {}
    }

    let handshake = Handshake::with_versions(config.supported_versions.clone());
    let result = handshake.process(&data);
    let answer = Handshake::generate_response(&result);
    match result {
        Ok(negotiated) => {
            debug!(connection_id = %handle.id, proposed = ?negotiated.client_versions, "handshake accepted");
            stream.write_all(&answer).await?;
            stream.flush().await?;
            Ok(negotiated.version)
        }
        Err(e) => {
            warn!(connection_id = %handle.id, remote = %handle.remote, error = %e, "handshake rejected");
            // a bad preamble gets no answer at all
            if let HandshakeError::NoCompatibleVersion { .. } = e {
                stream.write_all(&answer).await?;
                stream.flush().await?;
            }
            Err(e.into())
        }
    }
}

async fn write_output<W>(mut socket: W, mut output: mpsc::Receiver<Bytes>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = output.recv().await {
        socket.write_all(&bytes).await?;
        socket.flush().await?;
    }
    socket.shutdown().await
}

fn run_worker(
    mut machine: BoltStateMachine,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    output: ChunkedOutput,
) {
    let mut writer = ResponseWriter::new(output);
    let mut next = jobs.blocking_recv();

    while let Some(job) = next {
        let result = match job {
            Job::Request(request) => machine.process(request, &mut writer),
            Job::Unreadable(error) => machine.fail_connection(&error, &mut writer),
        };
        if result.is_err() || machine.is_closed() {
            break;
        }
        next = match jobs.try_recv() {
            Ok(job) => Some(job),
            Err(TryRecvError::Empty) => {
                if let Err(e) = writer.flush() {
                    debug!(connection_id = %machine.connection_id(), error = %e, "flush failed");
                    break;
                }
                jobs.blocking_recv()
            }
            Err(TryRecvError::Disconnected) => None,
        };
    }

    if let Err(e) = writer.flush() {
        debug!(connection_id = %machine.connection_id(), error = %e, "final flush failed");
    }
    machine.close();
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bolt::handshake::build_client_handshake;
    use crate::bolt::message::{AuthToken, InitMessage, Response, RunMessage};
    use crate::bolt::packstream::{PackStreamDecoder, PackStreamEncoder, Value};
    use crate::server::memory::{CannedResult, InMemoryDatabase};
    use bytes::BytesMut;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio_util::codec::Encoder;

    /// Minimal Bolt client for driving a server in tests.
    pub(crate) struct TestClient<S> {
        reader: FramedRead<ReadHalf<S>, BoltCodec>,
        writer: WriteHalf<S>,
        catalog: &'static MessageCatalog,
    }

    impl<S: AsyncRead + AsyncWrite + Unpin> TestClient<S> {
        /// Handshake proposing `versions`; returns the server's answer.
        pub(crate) async fn connect(mut stream: S, versions: &[u32]) -> (Option<Self>, u32) {
            stream.write_all(&build_client_handshake(versions)).await.unwrap();
            let mut answer = [0u8; 4];
            stream.read_exact(&mut answer).await.unwrap();
            let agreed = u32::from_be_bytes(answer);
            let Some(version) = BoltVersion::from_u32(agreed) else {
                return (None, agreed);
            };
            let (read_half, write_half) = tokio::io::split(stream);
            let client = Self {
                reader: FramedRead::new(read_half, BoltCodec::new()),
                writer: write_half,
                catalog: MessageCatalog::for_version(version),
            };
            (Some(client), agreed)
        }

        pub(crate) async fn send(&mut self, request: Request) {
            let mut enc = PackStreamEncoder::new();
            request.encode(self.catalog, &mut enc).unwrap();
            self.send_raw(enc.as_bytes()).await;
        }

        pub(crate) async fn send_raw(&mut self, body: &[u8]) {
            let mut framed = BytesMut::new();
            BoltCodec::new()
                .encode(Bytes::copy_from_slice(body), &mut framed)
                .unwrap();
            self.writer.write_all(&framed).await.unwrap();
        }

        /// Next response, or `None` once the server closed the connection.
        pub(crate) async fn recv(&mut self) -> Option<Response> {
            let frame = self.reader.next().await?.ok()?;
            Some(Response::decode(&mut PackStreamDecoder::new(&frame)).unwrap())
        }

        pub(crate) async fn init(&mut self) {
            self.send(Request::Init(InitMessage::new("test/1.0", AuthToken::none())))
                .await;
            assert!(matches!(self.recv().await, Some(Response::Success(_))));
        }
    }

    fn context(config: ServerConfig) -> ConnectionContext {
        ConnectionContext {
            auth: config.authentication(),
            config: Arc::new(config),
            database: Arc::new(InMemoryDatabase::default()),
        }
    }

    fn spawn_server(
        config: ServerConfig,
    ) -> (DuplexStream, tokio::task::JoinHandle<BoltResult<()>>, watch::Sender<bool>) {
        spawn_server_with(context(config))
    }

    fn spawn_server_with(
        ctx: ConnectionContext,
    ) -> (DuplexStream, tokio::task::JoinHandle<BoltResult<()>>, watch::Sender<bool>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (tx, rx) = watch::channel(false);
        let handle = Arc::new(ConnectionHandle::new("bolt-test", "127.0.0.1:1".parse().unwrap()));
        let task = tokio::spawn(serve_connection(server, handle, ctx, rx));
        (client, task, tx)
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let (stream, task, _shutdown) = spawn_server(ServerConfig::default());
        let (client, version) = TestClient::connect(stream, &[1]).await;
        assert_eq!(version, 1);
        let mut client = client.unwrap();

        client
            .send(Request::Init(InitMessage::new("test/1.0", AuthToken::none())))
            .await;
        client.send(Request::Run(RunMessage::new("RETURN 1"))).await;
        client.send(Request::PullAll).await;

        assert!(matches!(client.recv().await, Some(Response::Success(_))));
        match client.recv().await {
            Some(Response::Success(meta)) => assert_eq!(meta.fields(), Some(vec!["1".to_string()])),
            other => panic!("unexpected {:?}", other),
        }
        match client.recv().await {
            Some(Response::Record(record)) => assert_eq!(record.fields, vec![Value::Integer(1)]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(client.recv().await, Some(Response::Success(_))));

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_signature_ends_connection() {
        let (stream, task, _shutdown) = spawn_server(ServerConfig::default());
        let mut client = TestClient::connect(stream, &[1]).await.0.unwrap();
        client.init().await;

        client.send_raw(&[0xB0, 0x99]).await;
        match client.recv().await {
            Some(Response::Failure(f)) => {
                assert_eq!(f.code, "Neo.ClientError.Request.InvalidFormat");
                assert!(f.message.contains("0x99"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(client.recv().await.is_none());
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reset_after_failure() {
        let (stream, task, _shutdown) = spawn_server(ServerConfig::default());
        let mut client = TestClient::connect(stream, &[1]).await.0.unwrap();
        client.init().await;

        // one at a time: a queued RESET would interrupt the requests ahead of it
        client.send(Request::Run(RunMessage::new("NOPE"))).await;
        assert!(matches!(client.recv().await, Some(Response::Failure(_))));
        client.send(Request::PullAll).await;
        assert!(matches!(client.recv().await, Some(Response::Ignored)));
        client.send(Request::Reset).await;
        assert!(matches!(client.recv().await, Some(Response::Success(_))));
        client.send(Request::Run(RunMessage::new("RETURN 2"))).await;
        assert!(matches!(client.recv().await, Some(Response::Success(_))));

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_no_compatible_version() {
        let config = ServerConfig::default().with_supported_versions(vec![BoltVersion::V1]);
        let (stream, task, _shutdown) = spawn_server(config);
        let (client, version) = TestClient::connect(stream, &[2, 3]).await;
        assert!(client.is_none());
        assert_eq!(version, 0);
        assert!(matches!(
            task.await.unwrap(),
            Err(BoltError::Handshake(HandshakeError::NoCompatibleVersion { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let (_stream, task, _shutdown) = spawn_server(ServerConfig::default());
        assert!(matches!(
            task.await.unwrap(),
            Err(BoltError::Handshake(HandshakeError::Timeout))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_connection() {
        let (stream, task, shutdown) = spawn_server(ServerConfig::default());
        let mut client = TestClient::connect(stream, &[2]).await.0.unwrap();
        client.init().await;

        shutdown.send(true).unwrap();
        assert!(client.recv().await.is_none());
        task.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_with_stalled_reader() {
        let row = Value::from("x".repeat(1024));
        let mut result = CannedResult::new(vec!["row"]);
        for _ in 0..2048 {
            result = result.with_record(vec![row.clone()]);
        }
        let config = ServerConfig::default();
        let ctx = ConnectionContext {
            auth: config.authentication(),
            config: Arc::new(config),
            database: Arc::new(InMemoryDatabase::default().with_result("MATCH (n) RETURN n", result)),
        };
        let (stream, task, shutdown) = spawn_server_with(ctx);
        let mut client = TestClient::connect(stream, &[1]).await.0.unwrap();
        client.init().await;
        client.send(Request::Run(RunMessage::new("MATCH (n) RETURN n"))).await;
        assert!(matches!(client.recv().await, Some(Response::Success(_))));

        // 2 MiB of records into a 64 KiB pipe that nobody reads
        client.send(Request::PullAll).await;
        tokio::task::spawn_blocking(|| std::thread::sleep(std::time::Duration::from_millis(200)))
            .await
            .unwrap();

        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
        drop(client);
    }
}
