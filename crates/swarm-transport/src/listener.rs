//! Inbound side of the connection pool: accept a TCP connection, run the
//! responder handshake, and hand back a ready channel. The sync engine
//! decides what to do with the resulting peer identity (trust gating
//! happens above this crate).

use crate::error::TransportResult;
use crate::framed::FramedSecureStream;
use crate::handshake::{self, HandshakeOutcome};
use std::net::SocketAddr;
use swarm_crypto::EphemeralKeypair;
use tokio::net::{TcpListener, TcpStream};

pub struct Inbound {
    pub addr: SocketAddr,
    pub handshake: HandshakeOutcome,
    pub stream: FramedSecureStream<TcpStream>,
}

/// Bind a TCP listener for inbound peer connections.
pub async fn bind(addr: SocketAddr) -> TransportResult<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Accept one connection and run the responder handshake on it.
pub async fn accept_one(listener: &TcpListener) -> TransportResult<Inbound> {
    let (mut stream, addr) = listener.accept().await?;
    stream.set_nodelay(true)?;
    let ephemeral = EphemeralKeypair::generate();
    let handshake = handshake::accept(&mut stream, &ephemeral).await?;
    let framed = FramedSecureStream::new(stream, handshake.session_key.clone());
    Ok(Inbound {
        addr,
        stream: framed,
        handshake,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::PeerId;
    use swarm_crypto::IdentityKeypair;

    #[tokio::test]
    async fn accept_one_completes_handshake() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let server_addr = listener.local_addr().unwrap();

        let client_identity = IdentityKeypair::generate();
        let client_eph = EphemeralKeypair::generate();
        let client_id = PeerId::from_public_key(&client_identity.public_key_bytes());

        let client_task = tokio::spawn(async move {
            let mut stream = TcpStream::connect(server_addr).await.unwrap();
            handshake::initiate(&mut stream, &client_id, "laptop", &client_identity, &client_eph)
                .await
                .unwrap()
        });

        let inbound = accept_one(&listener).await.unwrap();
        let client_key = client_task.await.unwrap();
        assert_eq!(inbound.handshake.session_key.as_bytes(), client_key.as_bytes());
    }
}
