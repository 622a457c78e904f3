//! Bolt protocol response messages.
//!
//! Response messages are sent from the server to the client.

use bytes::BufMut;

use super::signature;
use crate::bolt::error::StatusError;
use crate::bolt::packstream::{
    PackStreamDecoder, PackStreamEncoder, PackStreamError, Value, ValueMap,
};

/// All Bolt response messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// SUCCESS - request completed
    Success(SuccessMessage),
    /// RECORD - one result row
    Record(RecordMessage),
    /// IGNORED - request was not processed
    Ignored,
    /// FAILURE - request failed, the connection stays usable
    Failure(FailureMessage),
    /// FAILURE that ends the connection; identical on the wire
    FatalFailure(FailureMessage),
}

impl Response {
    pub fn signature(&self) -> u8 {
        match self {
            Response::Success(_) => signature::SUCCESS,
            Response::Record(_) => signature::RECORD,
            Response::Ignored => signature::IGNORED,
            Response::Failure(_) | Response::FatalFailure(_) => signature::FAILURE,
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Response::Success(_) => "SUCCESS",
            Response::Record(_) => "RECORD",
            Response::Ignored => "IGNORED",
            Response::Failure(_) => "FAILURE",
            Response::FatalFailure(_) => "FATAL_FAILURE",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Response::FatalFailure(_))
    }

    /// Whether this response ends a request (anything but RECORD).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Record(_))
    }

    /// Failure response for a status error, fatal or not.
    pub fn from_status_error(error: &StatusError) -> Self {
        let failure = FailureMessage::from(error);
        if error.fatal {
            Response::FatalFailure(failure)
        } else {
            Response::Failure(failure)
        }
    }

    /// Encode header and fields.
    pub fn encode<B: BufMut>(&self, enc: &mut PackStreamEncoder<B>) -> Result<(), PackStreamError> {
        match self {
            Response::Success(msg) => {
                enc.encode_struct_header(1, signature::SUCCESS)?;
                enc.encode_map(&msg.metadata)
            }
            Response::Record(msg) => {
                enc.encode_struct_header(1, signature::RECORD)?;
                enc.encode_list(&msg.fields)
            }
            Response::Ignored => enc.encode_struct_header(0, signature::IGNORED),
            Response::Failure(msg) | Response::FatalFailure(msg) => {
                enc.encode_struct_header(1, signature::FAILURE)?;
                enc.encode_map(&msg.to_map())
            }
        }
    }

    /// Decode one response. FAILURE always decodes as non-fatal since the
    /// wire form does not say.
    pub fn decode(dec: &mut PackStreamDecoder<'_>) -> Result<Self, PackStreamError> {
        let start = dec.position();
        let (size, sig) = dec.read_struct_header()?;
        let expected = if sig == signature::IGNORED { 0 } else { 1 };
        match sig {
            signature::SUCCESS | signature::RECORD | signature::IGNORED | signature::FAILURE => {
                if size != expected {
                    return Err(PackStreamError::WrongArity {
                        signature: sig,
                        expected,
                        actual: size,
                        position: start,
                    });
                }
            }
            _ => {
                return Err(PackStreamError::UnknownSignature {
                    signature: sig,
                    position: start,
                })
            }
        }

        match sig {
            signature::IGNORED => Ok(Response::Ignored),
            signature::RECORD => match dec.decode()? {
                Value::List(fields) => Ok(Response::Record(RecordMessage::new(fields))),
                other => Err(payload_error("RECORD", "List", &other)),
            },
            signature::SUCCESS => match dec.decode()? {
                Value::Map(metadata) => Ok(Response::Success(SuccessMessage::with_metadata(metadata))),
                other => Err(payload_error("SUCCESS", "Map", &other)),
            },
            _ => match dec.decode()? {
                Value::Map(map) => Ok(Response::Failure(FailureMessage::from_map(&map))),
                other => Err(payload_error("FAILURE", "Map", &other)),
            },
        }
    }
}

fn payload_error(message: &str, expected: &str, found: &Value) -> PackStreamError {
    PackStreamError::InvalidStructure(format!(
        "{} payload must be {}, got {}",
        message,
        expected,
        found.type_name()
    ))
}

/// SUCCESS message - Operation completed successfully.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuccessMessage {
    pub metadata: ValueMap,
}

impl SuccessMessage {
    /// Create a new SUCCESS message with empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(metadata: ValueMap) -> Self {
        Self { metadata }
    }

    /// Add metadata entry.
    pub fn add(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Field names from a RUN success.
    pub fn fields(&self) -> Option<Vec<String>> {
        self.metadata.get("fields").and_then(|v| {
            v.as_list().map(|list| {
                list.iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
        })
    }

    /// Check if there are more results.
    pub fn has_more(&self) -> bool {
        self.metadata
            .get("has_more")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// RECORD message - one row of a result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordMessage {
    pub fields: Vec<Value>,
}

impl RecordMessage {
    pub fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// FAILURE message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureMessage {
    /// Status code (e.g. `Neo.ClientError.Statement.SyntaxError`)
    pub code: String,
    pub message: String,
}

impl FailureMessage {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Classification segment of the code, e.g. `ClientError`.
    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("")
    }

    pub fn to_map(&self) -> ValueMap {
        let mut map = ValueMap::new();
        map.insert("code".to_string(), Value::from(self.code.as_str()));
        map.insert("message".to_string(), Value::from(self.message.as_str()));
        map
    }

    pub fn from_map(map: &ValueMap) -> Self {
        let text = |key: &str| {
            map.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            code: text("code"),
            message: text("message"),
        }
    }
}

impl From<&StatusError> for FailureMessage {
    fn from(error: &StatusError) -> Self {
        Self::new(error.status.code(), &error.message)
    }
}

impl std::fmt::Display for FailureMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
