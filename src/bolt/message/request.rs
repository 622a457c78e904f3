//! Bolt protocol request messages.
//!
//! Request messages are sent from the client to the server.

use bytes::BufMut;

use super::catalog::{MessageCatalog, RequestKind};
use crate::bolt::packstream::{PackStreamEncoder, PackStreamError, Value, ValueMap};

/// Authentication token carried by INIT.
///
/// The well-known keys are lifted out; everything else stays in
/// `parameters`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    /// Authentication scheme (e.g., "basic", "none")
    pub scheme: String,
    /// Principal (username)
    pub principal: Option<String>,
    /// Credentials (password)
    pub credentials: Option<String>,
    pub realm: Option<String>,
    /// Additional parameters
    pub parameters: ValueMap,
}

const AUTH_KEYS: [&str; 4] = ["scheme", "principal", "credentials", "realm"];

impl AuthToken {
    /// Create a basic auth token.
    pub fn basic(principal: &str, credentials: &str) -> Self {
        Self {
            scheme: "basic".to_string(),
            principal: Some(principal.to_string()),
            credentials: Some(credentials.to_string()),
            realm: None,
            parameters: ValueMap::new(),
        }
    }

    /// Create an anonymous auth token.
    pub fn none() -> Self {
        Self {
            scheme: "none".to_string(),
            principal: None,
            credentials: None,
            realm: None,
            parameters: ValueMap::new(),
        }
    }

    /// Convert to a PackStream map.
    pub fn to_map(&self) -> ValueMap {
        let mut map = self.parameters.clone();
        map.insert("scheme".to_string(), Value::from(self.scheme.as_str()));
        if let Some(ref p) = self.principal {
            map.insert("principal".to_string(), Value::from(p.as_str()));
        }
        if let Some(ref c) = self.credentials {
            map.insert("credentials".to_string(), Value::from(c.as_str()));
        }
        if let Some(ref r) = self.realm {
            map.insert("realm".to_string(), Value::from(r.as_str()));
        }
        map
    }

    /// Build from a plain map. A missing scheme means `none`.
    pub fn from_map(mut map: ValueMap) -> Self {
        let mut take = |key: &str| match map.remove(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        let scheme = take("scheme").unwrap_or_else(|| "none".to_string());
        let principal = take("principal");
        let credentials = take("credentials");
        let realm = take("realm");
        map.retain(|k, _| !AUTH_KEYS.contains(&k.as_str()));

        Self {
            scheme,
            principal,
            credentials,
            realm,
            parameters: map,
        }
    }
}

/// INIT message - authenticate and initialize the session.
#[derive(Debug, Clone, PartialEq)]
pub struct InitMessage {
    /// Client name and version, e.g. `MyDriver/1.0`
    pub client_name: String,
    pub auth_token: AuthToken,
}

impl InitMessage {
    pub fn new(client_name: &str, auth_token: AuthToken) -> Self {
        Self {
            client_name: client_name.to_string(),
            auth_token,
        }
    }
}

/// RUN message - execute a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMessage {
    pub statement: String,
    pub parameters: ValueMap,
    /// Bolt 2 only; empty on Bolt 1.
    pub metadata: ValueMap,
}

impl RunMessage {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            parameters: ValueMap::new(),
            metadata: ValueMap::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: ValueMap) -> Self {
        self.parameters = parameters;
        self
    }

    /// Select the target database (Bolt 2 metadata `db`).
    pub fn with_database(mut self, db: &str) -> Self {
        self.metadata.insert("db".to_string(), Value::from(db));
        self
    }

    /// Target database requested by the client, if any.
    pub fn database(&self) -> Option<&str> {
        self.metadata.get("db").and_then(|v| v.as_str())
    }
}

/// All Bolt request messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Init(InitMessage),
    AckFailure,
    Reset,
    Run(RunMessage),
    DiscardAll,
    PullAll,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Init(_) => RequestKind::Init,
            Request::AckFailure => RequestKind::AckFailure,
            Request::Reset => RequestKind::Reset,
            Request::Run(_) => RequestKind::Run,
            Request::DiscardAll => RequestKind::DiscardAll,
            Request::PullAll => RequestKind::PullAll,
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Encode as the given catalog expects it. This is the client side of
    /// the exchange and is used by tests and tooling.
    pub fn encode<B: BufMut>(
        &self,
        catalog: &MessageCatalog,
        enc: &mut PackStreamEncoder<B>,
    ) -> Result<(), PackStreamError> {
        let entry = catalog.entry_for(self.kind()).ok_or_else(|| {
            PackStreamError::InvalidStructure(format!(
                "{} is not part of Bolt {}",
                self.name(),
                catalog.version()
            ))
        })?;
        enc.encode_struct_header(entry.field_count, entry.signature)?;
        match self {
            Request::Init(init) => {
                enc.encode_string(&init.client_name)?;
                enc.encode_map(&init.auth_token.to_map())?;
            }
            Request::Run(run) => {
                enc.encode_string(&run.statement)?;
                enc.encode_map(&run.parameters)?;
                if entry.field_count > 2 {
                    enc.encode_map(&run.metadata)?;
                }
            }
            Request::AckFailure | Request::Reset | Request::DiscardAll | Request::PullAll => {}
        }
        Ok(())
    }
}

impl From<RunMessage> for Request {
    fn from(run: RunMessage) -> Self {
        Request::Run(run)
    }
}

impl From<InitMessage> for Request {
    fn from(init: InitMessage) -> Self {
        Request::Init(init)
    }
}
