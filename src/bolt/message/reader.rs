//! Request decoding.

use tracing::trace;

use super::catalog::{MessageCatalog, RequestKind};
use super::request::{AuthToken, InitMessage, Request, RunMessage};
use crate::bolt::error::{BoltError, BoltResult};
use crate::bolt::packstream::{PackStreamDecoder, PackStreamError, Value, ValueMap};

/// Decodes one request per de-chunked message frame.
///
/// A frame holds exactly one message, so a failed decode never leaves the
/// input in the middle of a structure: the next frame starts clean.
#[derive(Debug, Clone, Copy)]
pub struct RequestReader {
    catalog: &'static MessageCatalog,
}

impl RequestReader {
    pub fn new(catalog: &'static MessageCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &'static MessageCatalog {
        self.catalog
    }

    /// Decode a complete message frame into a request.
    pub fn read(&self, frame: &[u8]) -> BoltResult<Request> {
        let mut dec = PackStreamDecoder::new(frame);
        let (size, signature) = dec.read_struct_header().map_err(format_error)?;

        let entry = self.catalog.lookup(signature).ok_or_else(|| {
            BoltError::InvalidMessageFormat(format!(
                "Unknown message signature 0x{:02X} for Bolt {}",
                signature,
                self.catalog.version()
            ))
        })?;
        if size != entry.field_count {
            return Err(BoltError::InvalidMessageFormat(format!(
                "{} (0x{:02X}) expects {} fields, got {}",
                entry.kind.name(),
                signature,
                entry.field_count,
                size
            )));
        }

        let request = match entry.kind {
            RequestKind::Init => {
                let client_name = read_string(&mut dec, "INIT client name")?;
                let auth = read_map(&mut dec, "INIT auth token")?;
                Request::Init(InitMessage::new(&client_name, normalize_auth_token(auth)?))
            }
            RequestKind::Run => {
                let statement = read_string(&mut dec, "RUN statement")?;
                let parameters = read_map(&mut dec, "RUN parameters")?;
                let metadata = if entry.field_count > 2 {
                    read_map(&mut dec, "RUN metadata")?
                } else {
                    ValueMap::new()
                };
                Request::Run(RunMessage {
                    statement,
                    parameters,
                    metadata,
                })
            }
            RequestKind::AckFailure => Request::AckFailure,
            RequestKind::Reset => Request::Reset,
            RequestKind::DiscardAll => Request::DiscardAll,
            RequestKind::PullAll => Request::PullAll,
        };

        if !dec.is_empty() {
            return Err(BoltError::InvalidMessageFormat(format!(
                "{} bytes after the end of {}",
                dec.remaining(),
                request.name()
            )));
        }

        trace!(message = request.name(), bytes = frame.len(), "request decoded");
        Ok(request)
    }
}

fn format_error(err: PackStreamError) -> BoltError {
    BoltError::InvalidMessageFormat(err.to_string())
}

fn read_string(dec: &mut PackStreamDecoder<'_>, what: &str) -> BoltResult<String> {
    match dec.decode().map_err(format_error)? {
        Value::String(s) => Ok(s),
        other => Err(BoltError::InvalidMessageFormat(format!(
            "{} must be String, got {}",
            what,
            other.type_name()
        ))),
    }
}

fn read_map(dec: &mut PackStreamDecoder<'_>, what: &str) -> BoltResult<ValueMap> {
    match dec.decode().map_err(format_error)? {
        Value::Map(m) => Ok(m),
        other => Err(BoltError::InvalidMessageFormat(format!(
            "{} must be Map, got {}",
            what,
            other.type_name()
        ))),
    }
}

/// Auth tokens are plain data: graph and spatial values are refused
/// anywhere inside them.
fn normalize_auth_token(map: ValueMap) -> BoltResult<AuthToken> {
    for value in map.values() {
        reject_structural(value)?;
    }
    Ok(AuthToken::from_map(map))
}

fn reject_structural(value: &Value) -> BoltResult<()> {
    match value {
        Value::Node(_) => Err(BoltError::UnsupportedOperation("nodes")),
        Value::Relationship(_) => Err(BoltError::UnsupportedOperation("relationships")),
        Value::Path(_) => Err(BoltError::UnsupportedOperation("paths")),
        Value::Point(_) => Err(BoltError::UnsupportedOperation("points")),
        Value::List(items) => items.iter().try_for_each(reject_structural),
        Value::Map(map) => map.values().try_for_each(reject_structural),
        _ => Ok(()),
    }
}
