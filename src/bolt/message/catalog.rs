//! Per-version request catalog.
//!
//! Each protocol version registers its own signature table. Lookups of
//! unregistered signatures fail; nothing falls back to another version.

use serde::Deserialize;

use super::signature;
use crate::bolt::handshake::BoltVersion;

/// Request kinds known to any protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Init,
    AckFailure,
    Reset,
    Run,
    DiscardAll,
    PullAll,
}

impl RequestKind {
    /// Name for logging.
    pub fn name(self) -> &'static str {
        match self {
            RequestKind::Init => "INIT",
            RequestKind::AckFailure => "ACK_FAILURE",
            RequestKind::Reset => "RESET",
            RequestKind::Run => "RUN",
            RequestKind::DiscardAll => "DISCARD_ALL",
            RequestKind::PullAll => "PULL_ALL",
        }
    }
}

/// How a session leaves the failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Requests are ignored until the client sends ACK_FAILURE (or RESET).
    RequireAck,
    /// The next request clears the failure and runs normally.
    AutoClear,
}

/// One registered request: signature, kind and declared field count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub signature: u8,
    pub kind: RequestKind,
    pub field_count: usize,
}

const fn entry(signature: u8, kind: RequestKind, field_count: usize) -> CatalogEntry {
    CatalogEntry {
        signature,
        kind,
        field_count,
    }
}

/// Immutable signature table for one protocol version.
#[derive(Debug)]
pub struct MessageCatalog {
    version: BoltVersion,
    failure_policy: FailurePolicy,
    entries: &'static [CatalogEntry],
}

static V1_ENTRIES: [CatalogEntry; 6] = [
    entry(signature::INIT, RequestKind::Init, 2),
    entry(signature::ACK_FAILURE, RequestKind::AckFailure, 0),
    entry(signature::RESET, RequestKind::Reset, 0),
    entry(signature::RUN, RequestKind::Run, 2),
    entry(signature::DISCARD_ALL, RequestKind::DiscardAll, 0),
    entry(signature::PULL_ALL, RequestKind::PullAll, 0),
];

static V2_ENTRIES: [CatalogEntry; 5] = [
    entry(signature::INIT, RequestKind::Init, 2),
    entry(signature::RESET, RequestKind::Reset, 0),
    entry(signature::RUN, RequestKind::Run, 3),
    entry(signature::DISCARD_ALL, RequestKind::DiscardAll, 0),
    entry(signature::PULL_ALL, RequestKind::PullAll, 0),
];

static V1: MessageCatalog = MessageCatalog {
    version: BoltVersion::V1,
    failure_policy: FailurePolicy::RequireAck,
    entries: &V1_ENTRIES,
};

static V2: MessageCatalog = MessageCatalog {
    version: BoltVersion::V2,
    failure_policy: FailurePolicy::AutoClear,
    entries: &V2_ENTRIES,
};

impl MessageCatalog {
    /// The catalog for a negotiated version.
    pub fn for_version(version: BoltVersion) -> &'static MessageCatalog {
        match version {
            BoltVersion::V1 => &V1,
            BoltVersion::V2 => &V2,
        }
    }

    pub fn version(&self) -> BoltVersion {
        self.version
    }

    /// Failure policy this version uses unless configured otherwise.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn entries(&self) -> &'static [CatalogEntry] {
        self.entries
    }

    pub fn lookup(&self, signature: u8) -> Option<&'static CatalogEntry> {
        self.entries.iter().find(|e| e.signature == signature)
    }

    /// Entry registered for a request kind, if this version has it.
    pub fn entry_for(&self, kind: RequestKind) -> Option<&'static CatalogEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_catalog() {
        let catalog = MessageCatalog::for_version(BoltVersion::V1);
        assert_eq!(catalog.version(), BoltVersion::V1);
        assert_eq!(catalog.failure_policy(), FailurePolicy::RequireAck);
        let run = catalog.lookup(0x10).unwrap();
        assert_eq!(run.kind, RequestKind::Run);
        assert_eq!(run.field_count, 2);
        assert_eq!(catalog.lookup(0x0E).unwrap().kind, RequestKind::AckFailure);
    }

    #[test]
    fn test_v2_catalog() {
        let catalog = MessageCatalog::for_version(BoltVersion::V2);
        assert_eq!(catalog.failure_policy(), FailurePolicy::AutoClear);
        assert_eq!(catalog.lookup(0x10).unwrap().field_count, 3);
        assert!(catalog.lookup(0x0E).is_none());
        assert!(catalog.entry_for(RequestKind::AckFailure).is_none());
    }

    #[test]
    fn test_unknown_signature() {
        for version in BoltVersion::ALL {
            let catalog = MessageCatalog::for_version(version);
            assert!(catalog.lookup(0x99).is_none());
            assert!(catalog.lookup(0x70).is_none());
        }
    }

    #[test]
    fn test_signatures_are_unique() {
        for version in BoltVersion::ALL {
            let entries = MessageCatalog::for_version(version).entries();
            for (i, a) in entries.iter().enumerate() {
                for b in &entries[i + 1..] {
                    assert_ne!(a.signature, b.signature);
                }
            }
        }
    }
}
