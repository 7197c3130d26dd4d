//! Test support: a minimal raw-UDP protocol client.
//!
//! Speaks the real wire format against a live server — no shortcuts through
//! server internals — so the integration tests exercise exactly what a
//! production peer would send and receive.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use starlane_shared::packet::{decode_frame, encode_frame, Packet};
use tokio::net::UdpSocket;

/// Default patience for one expected datagram.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl TestClient {
    /// Binds an ephemeral client socket aimed at the server.
    pub async fn new(server: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .context("bind client socket")?;
        // Servers bound to the unspecified address are reached via loopback.
        let server = if server.ip().is_unspecified() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), server.port())
        } else {
            server
        };
        Ok(Self { socket, server })
    }

    pub async fn send_packet(&self, packet: &Packet) -> anyhow::Result<()> {
        let frame = encode_frame(packet, None);
        self.socket
            .send_to(&frame, self.server)
            .await
            .context("client send")?;
        Ok(())
    }

    pub async fn send_raw(&self, bytes: &[u8]) -> anyhow::Result<()> {
        self.socket
            .send_to(bytes, self.server)
            .await
            .context("client raw send")?;
        Ok(())
    }

    /// Receives the next protocol packet, transparently answering delivery
    /// confirmations and skipping `Ack`s addressed to us.
    pub async fn expect_packet(&self) -> anyhow::Result<Packet> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (n, _from) = tokio::time::timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf))
                .await
                .context("timed out waiting for packet")?
                .context("client recv")?;
            let (seq, packet) = decode_frame(Bytes::copy_from_slice(&buf[..n]))?;
            if let Some(seq) = seq {
                self.send_packet(&Packet::Ack { seq }).await?;
            }
            if matches!(packet, Packet::Ack { .. }) {
                continue;
            }
            return Ok(packet);
        }
    }

    /// Receives one raw datagram (discovery/ping responses are not frames).
    pub async fn expect_raw(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![0u8; 64 * 1024];
        let (n, _from) = tokio::time::timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf))
            .await
            .context("timed out waiting for datagram")?
            .context("client recv")?;
        Ok(buf[..n].to_vec())
    }
}
