use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::cluster::messages::{DetectorCommand, OutboundPacket, Packet};
use crate::cluster::WIRE_CONFIG;
use crate::error::Result;
use crate::keyring::Keyring;

// Gossip byte budget + packet header + sealed-envelope overhead all fit
// comfortably below the common 1500-byte path MTU.
const MAX_DATAGRAM: usize = 1400;

/// Datagrams silently dropped by the framing layer. The protocol never
/// surfaces these as errors; the counters exist for operators.
#[derive(Debug, Default)]
pub struct TransportStats {
    pub failed_verification: AtomicU64,
    pub malformed: AtomicU64,
    pub send_errors: AtomicU64,
}

/// Owns the UDP socket and the keyring framing in both directions.
///
/// Inbound: recv → keyring open → decode → detector mailbox. Outbound:
/// detector → encode → keyring seal → send. Every failure on either path is
/// counted and dropped; datagrams are fire-and-forget by design.
pub(crate) struct TransportLayer {
    socket: Arc<UdpSocket>,
    keyring: Arc<Keyring>,
    to_detector: mpsc::Sender<DetectorCommand>,
    from_detector: mpsc::Receiver<OutboundPacket>,
    stats: Arc<TransportStats>,
}

impl TransportLayer {
    pub(crate) async fn bind(
        bind_addr: SocketAddr,
        keyring: Arc<Keyring>,
        to_detector: mpsc::Sender<DetectorCommand>,
        from_detector: mpsc::Receiver<OutboundPacket>,
    ) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        Ok(Self {
            socket,
            keyring,
            to_detector,
            from_detector,
            stats: Arc::new(TransportStats::default()),
        })
    }

    pub(crate) fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub(crate) fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }

    pub(crate) async fn run(mut self) {
        match self.socket.local_addr() {
            Ok(addr) => tracing::info!(%addr, "transport listening"),
            Err(e) => tracing::warn!(error = %e, "transport has no local address"),
        }

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, src)) => {
                            if !self.handle_inbound(&buf[..len], src).await {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "socket receive failed");
                        }
                    }
                }

                outbound = self.from_detector.recv() => {
                    match outbound {
                        Some(pkt) => self.handle_outbound(pkt).await,
                        // Detector gone: the agent is shutting down.
                        None => return,
                    }
                }
            }
        }
    }

    /// Returns false once the detector mailbox is closed.
    async fn handle_inbound(&self, datagram: &[u8], src: SocketAddr) -> bool {
        let plaintext = match self.keyring.decrypt(datagram) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                self.stats.failed_verification.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%src, "dropping datagram that failed verification");
                return true;
            }
        };

        let packet: Packet = match bincode::decode_from_slice(&plaintext, WIRE_CONFIG) {
            Ok((packet, _)) => packet,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%src, error = %e, "dropping malformed message");
                return true;
            }
        };

        self.to_detector
            .send(DetectorCommand::PacketReceived { src, packet })
            .await
            .is_ok()
    }

    async fn handle_outbound(&self, outbound: OutboundPacket) {
        let encoded = match bincode::encode_to_vec(outbound.packet(), WIRE_CONFIG) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "failed to encode outbound packet");
                return;
            }
        };
        let sealed = match self.keyring.encrypt(&encoded) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "failed to seal outbound packet");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&sealed, outbound.target).await {
            // Treated as silent loss; the probe runs its course without it.
            self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(target = %outbound.target, error = %e, "send failed, dropping datagram");
        }
    }
}
