//! Bolt handshake negotiation.

use super::{BoltVersion, HandshakeError, BOLT_MAGIC, HANDSHAKE_SIZE};

/// Result of a successful handshake.
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    /// Negotiated protocol version
    pub version: BoltVersion,
    /// Client's proposed versions, for logging
    pub client_versions: [u32; 4],
}

/// Server side of the Bolt handshake.
///
/// 1. Client sends 20 bytes: 4-byte magic + 4 x 4-byte version proposals
/// 2. Server validates the magic number
/// 3. Server picks the first client proposal it supports
/// 4. Server responds with that version, or `00 00 00 00` and closes
#[derive(Debug, Clone)]
pub struct Handshake {
    supported_versions: Vec<BoltVersion>,
}

impl Handshake {
    /// Create a handshake handler accepting every known version.
    pub fn new() -> Self {
        Self {
            supported_versions: BoltVersion::ALL.to_vec(),
        }
    }

    /// Create a handshake handler with specific supported versions.
    pub fn with_versions(versions: Vec<BoltVersion>) -> Self {
        Self {
            supported_versions: versions,
        }
    }

    pub fn supported_versions(&self) -> &[BoltVersion] {
        &self.supported_versions
    }

    /// Process a client handshake and negotiate a version.
    pub fn process(&self, data: &[u8]) -> Result<HandshakeResult, HandshakeError> {
        if data.len() < HANDSHAKE_SIZE {
            return Err(HandshakeError::InvalidData(format!(
                "Expected {} bytes, got {}",
                HANDSHAKE_SIZE,
                data.len()
            )));
        }

        let magic = [data[0], data[1], data[2], data[3]];
        if magic != BOLT_MAGIC {
            return Err(HandshakeError::InvalidMagic {
                expected: BOLT_MAGIC,
                received: magic,
            });
        }

        let client_versions = parse_versions(&data[4..HANDSHAKE_SIZE]);
        let version = self.negotiate_version(&client_versions)?;

        Ok(HandshakeResult {
            version,
            client_versions,
        })
    }

    /// Client order wins: the first proposal this server supports is chosen.
    fn negotiate_version(&self, client_versions: &[u32; 4]) -> Result<BoltVersion, HandshakeError> {
        client_versions
            .iter()
            .filter(|&&v| v != 0)
            .filter_map(|&v| BoltVersion::from_u32(v))
            .find(|v| self.supported_versions.contains(v))
            .ok_or(HandshakeError::NoCompatibleVersion {
                proposed: *client_versions,
            })
    }

    /// The 4 bytes sent back to the client.
    pub fn generate_response(result: &Result<HandshakeResult, HandshakeError>) -> [u8; 4] {
        match result {
            Ok(hr) => hr.version.to_bytes(),
            Err(_) => [0x00, 0x00, 0x00, 0x00],
        }
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_versions(data: &[u8]) -> [u32; 4] {
    let mut versions = [0u32; 4];
    for (slot, chunk) in versions.iter_mut().zip(data.chunks_exact(4)) {
        *slot = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    versions
}

/// Build a client handshake message. Used by tests and tooling.
pub fn build_client_handshake(versions: &[u32]) -> [u8; HANDSHAKE_SIZE] {
    let mut data = [0u8; HANDSHAKE_SIZE];
    data[0..4].copy_from_slice(&BOLT_MAGIC);
    for (i, version) in versions.iter().take(4).enumerate() {
        let offset = 4 + (i * 4);
        data[offset..offset + 4].copy_from_slice(&version.to_be_bytes());
    }
    data
}
