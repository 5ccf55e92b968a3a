//! Secure session handshake: mutual authentication over a freshly connected
//! TCP stream, followed by session-key derivation for the framed stream
//! that rides on top of it.

use crate::error::{TransportError, TransportResult};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::time::Duration;
use swarm_core::PeerId;
use swarm_crypto::{EphemeralKeypair, IdentityKeypair, SessionKey, derive_session_key, verify};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const BANNER: &str = "SECURE_HANDSHAKE:1.0";
const OK: &str = "HANDSHAKE_OK";
const FAILED_PREFIX: &str = "HANDSHAKE_FAILED:";
/// §5: "handshake 5 s" — bounds the entire banner/key/signature exchange
/// on both the initiator and responder side.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// The peer-supplied material a responder learns once a handshake
/// succeeds. An initiator already knows who it dialed (from the peer
/// table) and so only needs the derived [`SessionKey`]; see
/// [`initiate`].
pub struct HandshakeOutcome {
    pub session_key: SessionKey,
    pub remote_identity_pub: Vec<u8>,
    pub remote_peer_id: PeerId,
}

async fn write_string<S: AsyncWrite + Unpin>(stream: &mut S, s: &str) -> TransportResult<()> {
    write_bytes(stream, s.as_bytes()).await
}

async fn write_bytes<S: AsyncWrite + Unpin>(stream: &mut S, bytes: &[u8]) -> TransportResult<()> {
    stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    stream.write_all(bytes).await?;
    Ok(())
}

async fn read_bytes<S: AsyncRead + Unpin>(stream: &mut S) -> TransportResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn read_string<S: AsyncRead + Unpin>(stream: &mut S) -> TransportResult<String> {
    let bytes = read_bytes(stream).await?;
    String::from_utf8(bytes).map_err(|e| TransportError::HandshakeFailed(e.to_string()))
}

/// Build the deterministic byte string that the handshake signature
/// covers: `local_id || base64(ephemeral_pub)`.
fn signable(local_id: &str, ephemeral_pub: &[u8]) -> Vec<u8> {
    let mut msg = local_id.as_bytes().to_vec();
    msg.extend_from_slice(BASE64.encode(ephemeral_pub).as_bytes());
    msg
}

/// Run the initiator side of the handshake over a just-connected stream.
/// The responder's identity is not re-derived here: the caller already
/// knows who it dialed from the peer table entry used to find this
/// address, and the sync engine gates trust on that, not on this
/// handshake alone.
pub async fn initiate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    local_id: &PeerId,
    device_name: &str,
    identity: &IdentityKeypair,
    ephemeral: &EphemeralKeypair,
) -> TransportResult<SessionKey> {
    tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        initiate_inner(stream, local_id, device_name, identity, ephemeral),
    )
    .await
    .map_err(|_| TransportError::Timeout(HANDSHAKE_TIMEOUT))?
}

async fn initiate_inner<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    local_id: &PeerId,
    device_name: &str,
    identity: &IdentityKeypair,
    ephemeral: &EphemeralKeypair,
) -> TransportResult<SessionKey> {
    let eph_pub = ephemeral.public_key_bytes();
    let id_pub = identity.public_key_bytes();
    let signature = identity.sign(&signable(local_id.as_str(), &eph_pub));

    write_string(stream, BANNER).await?;
    write_string(stream, local_id.as_str()).await?;
    write_string(stream, device_name).await?;
    write_bytes(stream, &eph_pub).await?;
    write_bytes(stream, &id_pub).await?;
    write_bytes(stream, &signature).await?;

    let status = read_string(stream).await?;
    if status != OK {
        let reason = status.strip_prefix(FAILED_PREFIX).unwrap_or(&status).to_string();
        return Err(TransportError::HandshakeRejected(reason));
    }
    let remote_eph_pub = read_bytes(stream).await?;

    let shared = ephemeral.agree(&remote_eph_pub).map_err(TransportError::Crypto)?;
    Ok(derive_session_key(&shared, &eph_pub, &remote_eph_pub))
}

/// Run the responder side. Does not enforce trust; the caller is
/// responsible for checking `remote_identity_pub` against its trust store
/// and acting accordingly — a responder always completes the cryptographic
/// handshake so the sync engine can gate on trust afterward.
pub async fn accept<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    ephemeral: &EphemeralKeypair,
) -> TransportResult<HandshakeOutcome> {
    tokio::time::timeout(HANDSHAKE_TIMEOUT, accept_inner(stream, ephemeral))
        .await
        .map_err(|_| TransportError::Timeout(HANDSHAKE_TIMEOUT))?
}

async fn accept_inner<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    ephemeral: &EphemeralKeypair,
) -> TransportResult<HandshakeOutcome> {
    let banner = read_string(stream).await?;
    if banner != BANNER {
        return Err(TransportError::HandshakeFailed(format!("unexpected banner: {banner}")));
    }
    let remote_id_str = read_string(stream).await?;
    let _device_name = read_string(stream).await?;
    let remote_eph_pub = read_bytes(stream).await?;
    let remote_id_pub = read_bytes(stream).await?;
    let signature = read_bytes(stream).await?;

    let expected = signable(&remote_id_str, &remote_eph_pub);
    if !verify(&expected, &signature, &remote_id_pub) {
        let reason = "signature verification failed";
        write_string(stream, &format!("{FAILED_PREFIX}{reason}")).await?;
        return Err(TransportError::HandshakeFailed(reason.to_string()));
    }

    let eph_pub = ephemeral.public_key_bytes();
    write_string(stream, OK).await?;
    write_bytes(stream, &eph_pub).await?;

    let shared = ephemeral.agree(&remote_eph_pub).map_err(TransportError::Crypto)?;
    let session_key = derive_session_key(&shared, &remote_eph_pub, &eph_pub);

    Ok(HandshakeOutcome {
        session_key,
        remote_identity_pub: remote_id_pub,
        remote_peer_id: PeerId::from_public_key(&remote_id_pub),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn handshake_succeeds_and_derives_matching_keys() {
        let (mut client, mut server) = duplex(8192);

        let client_identity = IdentityKeypair::generate();
        let client_eph = EphemeralKeypair::generate();
        let client_id = PeerId::from_public_key(&client_identity.public_key_bytes());

        let server_eph = EphemeralKeypair::generate();

        let client_task = tokio::spawn(async move {
            initiate(&mut client, &client_id, "laptop", &client_identity, &client_eph).await
        });
        let server_outcome = accept(&mut server, &server_eph).await.unwrap();
        let client_session_key = client_task.await.unwrap().unwrap();

        assert_eq!(client_session_key.as_bytes(), server_outcome.session_key.as_bytes());
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let (mut client, mut server) = duplex(8192);

        let client_identity = IdentityKeypair::generate();
        let client_eph = EphemeralKeypair::generate();
        let wrong_id = PeerId::from_public_key(b"not the real identity");

        let server_eph = EphemeralKeypair::generate();

        let client_task = tokio::spawn(async move {
            initiate(&mut client, &wrong_id, "laptop", &client_identity, &client_eph).await
        });
        let server_result = accept(&mut server, &server_eph).await;
        assert!(server_result.is_err());
        let _ = client_task.await.unwrap();
    }
}
