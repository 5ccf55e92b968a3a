//! Wire shape of a presence broadcast, plus the legacy unsigned fallback
//! format this implementation still accepts for backward compatibility.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

pub const PROTOCOL: &str = "SWARM";
pub const VERSION: &str = "2.0";
pub const LEGACY_PREFIX: &str = "SWARM:1.0|";

/// The JSON shape broadcast on the discovery port. Field names are
/// `camelCase` on the wire; Rust fields stay `snake_case` and are mapped
/// with `serde(rename)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceMessage {
    pub protocol: String,
    pub version: String,
    #[serde(rename = "peerId")]
    pub peer_id: String,
    #[serde(rename = "peerName")]
    pub peer_name: String,
    #[serde(rename = "transferPort")]
    pub transfer_port: u16,
    #[serde(rename = "syncEnabled")]
    pub sync_enabled: bool,
    pub timestamp_ms: i64,
    #[serde(rename = "publicKey_b64")]
    pub public_key_b64: String,
    #[serde(rename = "signature_b64")]
    pub signature_b64: String,
}

impl PresenceMessage {
    #[must_use]
    pub fn new(
        peer_id: &str,
        peer_name: &str,
        transfer_port: u16,
        sync_enabled: bool,
        timestamp_ms: i64,
        public_key: &[u8],
        signature: &[u8],
    ) -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            version: VERSION.to_string(),
            peer_id: peer_id.to_string(),
            peer_name: peer_name.to_string(),
            transfer_port,
            sync_enabled,
            timestamp_ms,
            public_key_b64: BASE64.encode(public_key),
            signature_b64: BASE64.encode(signature),
        }
    }

    /// The deterministic string the signature covers:
    /// `peerId|peerName|transferPort|timestamp_ms`.
    #[must_use]
    pub fn signable(peer_id: &str, peer_name: &str, transfer_port: u16, timestamp_ms: i64) -> Vec<u8> {
        format!("{peer_id}|{peer_name}|{transfer_port}|{timestamp_ms}").into_bytes()
    }

    #[must_use]
    pub fn public_key(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.public_key_b64).ok()
    }

    #[must_use]
    pub fn signature(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.signature_b64).ok()
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// An untrusted, unsigned sighting reconstructed from the legacy pipe
/// format. Always marked untrusted regardless of trust-store contents.
#[derive(Debug, Clone)]
pub struct LegacySighting {
    pub peer_id: String,
    pub peer_name: String,
    pub transfer_port: u16,
    pub sync_enabled: bool,
}

/// Parse one received UDP datagram. JSON presence messages are tried
/// first; the legacy `SWARM:1.0|id|name|port|sync` line is the fallback.
pub enum ParsedDatagram {
    Signed(PresenceMessage),
    Legacy(LegacySighting),
}

pub fn parse(bytes: &[u8]) -> Option<ParsedDatagram> {
    if let Ok(msg) = serde_json::from_slice::<PresenceMessage>(bytes) {
        if msg.protocol == PROTOCOL {
            return Some(ParsedDatagram::Signed(msg));
        }
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    parse_legacy(text).map(ParsedDatagram::Legacy)
}

fn parse_legacy(text: &str) -> Option<LegacySighting> {
    let rest = text.strip_prefix(LEGACY_PREFIX)?;
    let mut parts = rest.splitn(4, '|');
    let peer_id = parts.next()?.to_string();
    let peer_name = parts.next()?.to_string();
    let transfer_port: u16 = parts.next()?.parse().ok()?;
    let sync_enabled = matches!(parts.next()?, "1" | "true" | "True");
    Some(LegacySighting {
        peer_id,
        peer_name,
        transfer_port,
        sync_enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_roundtrip() {
        let msg = PresenceMessage::new("ABCD1234", "laptop", 9001, true, 1_700_000_000_000, b"pub", b"sig");
        let bytes = msg.to_json().unwrap();
        match parse(&bytes) {
            Some(ParsedDatagram::Signed(parsed)) => {
                assert_eq!(parsed.peer_id, "ABCD1234");
                assert_eq!(parsed.public_key(), Some(b"pub".to_vec()));
            }
            _ => panic!("expected a signed datagram"),
        }
    }

    #[test]
    fn rejects_wrong_protocol() {
        let bytes = br#"{"protocol":"OTHER","version":"2.0","peerId":"X","peerName":"n","transferPort":1,"syncEnabled":true,"timestamp_ms":0,"publicKey_b64":"","signature_b64":""}"#;
        assert!(parse(bytes).is_none());
    }

    #[test]
    fn legacy_format_parses() {
        let line = "SWARM:1.0|ABCD1234|laptop|9001|1";
        match parse(line.as_bytes()) {
            Some(ParsedDatagram::Legacy(sighting)) => {
                assert_eq!(sighting.peer_id, "ABCD1234");
                assert_eq!(sighting.transfer_port, 9001);
                assert!(sighting.sync_enabled);
            }
            _ => panic!("expected a legacy sighting"),
        }
    }

    #[test]
    fn signable_matches_spec_shape() {
        let got = PresenceMessage::signable("ABCD1234", "laptop", 9001, 42);
        assert_eq!(got, b"ABCD1234|laptop|9001|42");
    }
}
