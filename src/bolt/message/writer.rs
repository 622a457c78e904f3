//! Response encoding with all-or-nothing message framing.

use bytes::BytesMut;
use tracing::debug;

use super::response::Response;
use crate::bolt::error::BoltResult;
use crate::bolt::packstream::PackStreamEncoder;

/// Buffered destination for encoded messages.
///
/// Bytes written to [`buffer`](MessageSink::buffer) between
/// `begin_message` and `message_succeeded` form one message. After
/// `message_failed` none of them may reach the wire.
pub trait MessageSink {
    /// Mark the start of a message.
    fn begin_message(&mut self);

    /// Buffer the current message is encoded into.
    fn buffer(&mut self) -> &mut BytesMut;

    /// Commit the current message.
    fn message_succeeded(&mut self) -> BoltResult<()>;

    /// Discard everything written since `begin_message`.
    fn message_failed(&mut self);

    /// Hand committed messages to the transport.
    fn flush(&mut self) -> BoltResult<()>;
}

/// Writes responses into a [`MessageSink`].
#[derive(Debug)]
pub struct ResponseWriter<S> {
    sink: S,
}

impl<S: MessageSink> ResponseWriter<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_inner(self) -> S {
        self.sink
    }

    /// Write one response. Either the whole message is committed or the
    /// sink is rolled back before the error is returned. Fatal failures are
    /// flushed immediately.
    pub fn write(&mut self, response: &Response) -> BoltResult<()> {
        self.sink.begin_message();
        let encoded = {
            let mut enc = PackStreamEncoder::from_buf(self.sink.buffer());
            response.encode(&mut enc)
        };
        if let Err(err) = encoded {
            self.sink.message_failed();
            return Err(err.into());
        }
        self.sink.message_succeeded()?;

        if response.is_terminal() {
            debug!(message = response.name(), "response written");
        }
        if response.is_fatal() {
            self.sink.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> BoltResult<()> {
        self.sink.flush()
    }
}
