use std::{future::Future, io, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{net::UdpSocket, select};
use tracing::{debug, info, warn};

use crate::{
    broadcast::{Broadcaster, PeerLink},
    codec::{EventKind, decode_bytes, encode_user_list},
    registry::PresenceRegistry,
};

/// Largest datagram read in one go; longer datagrams are truncated.
pub const MAX_DATAGRAM: usize = 1024;

/// A datagram destination. The socket is shared by every peer.
#[derive(Clone)]
pub struct Datagram {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
}

impl PeerLink for Datagram {
    // There is no connection to tear down; the datagram is simply lost.
    const EVICT_ON_FAILURE: bool = false;

    async fn deliver(&self, frame: &[u8]) -> io::Result<()> {
        self.socket.send_to(frame, self.addr).await.map(|_| ())
    }
}

/// Connectionless relay: one receive loop multiplexes every peer by its
/// source address.
pub struct UdpRelay {
    socket: Arc<UdpSocket>,
    broadcaster: Broadcaster<SocketAddr, Datagram>,
}

impl UdpRelay {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            broadcaster: Broadcaster::new(Arc::new(PresenceRegistry::new())),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("udp relay shutting down");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, addr)) => self.handle_datagram(&buf[..len], addr).await,
                        // ICMP errors from earlier sends surface here on some platforms.
                        Err(err) => debug!(error = ?err, "failed to receive datagram"),
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    /// Applies the registry change for one datagram and hands delivery to
    /// a separate task so the receive loop never waits on sends.
    async fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        let event = decode_bytes(data);
        let registry = self.broadcaster.registry();

        match event.kind {
            EventKind::Leave => {
                // Unknown or already departed peers produce no second leave.
                let Some(alias) = registry.unregister(&addr).await else {
                    debug!(%addr, "leave from unregistered peer");
                    return;
                };
                let remaining = registry.len().await;
                info!(%addr, %alias, remaining, "client disconnected");
                self.spawn_fan_out(data, addr, None);
            }
            EventKind::Hello => {
                let seed = registry
                    .register(addr, event.alias.clone(), self.link(addr))
                    .await;
                let online = registry.len().await;
                info!(
                    %addr,
                    alias = %event.alias,
                    online,
                    "client connected"
                );
                let seed = (!seed.is_empty()).then(|| encode_user_list(&seed));
                self.spawn_fan_out(data, addr, seed);
            }
            EventKind::UserListSeed(_) => {
                // Only the relay seeds presence; a forged seed would plant
                // users in every client's view.
                debug!(%addr, "dropping user list from client");
            }
            EventKind::Chat(_) => {
                // First traffic from an endpoint registers it; the alias
                // tracks whatever the latest frame was tagged with.
                registry
                    .register(addr, event.alias.clone(), self.link(addr))
                    .await;
                if event.is_blank_chat() {
                    return;
                }
                self.spawn_fan_out(data, addr, None);
            }
        }
    }

    fn link(&self, addr: SocketAddr) -> Datagram {
        Datagram {
            socket: Arc::clone(&self.socket),
            addr,
        }
    }

    /// Forwards `data` verbatim to everyone but `sender`, after sending the
    /// presence seed (if any) to the sender alone.
    fn spawn_fan_out(&self, data: &[u8], sender: SocketAddr, seed: Option<String>) {
        let broadcaster = self.broadcaster.clone();
        let link = self.link(sender);
        let frame = data.to_vec();

        tokio::spawn(async move {
            if let Some(seed) = seed {
                if let Err(err) = broadcaster.send_to(&link, seed.as_bytes()).await {
                    debug!(addr = %sender, error = ?err, "failed to send user list");
                }
            }
            let report = broadcaster.broadcast(&frame, Some(&sender)).await;
            if !report.failed.is_empty() {
                debug!(
                    addr = %sender,
                    delivered = report.delivered.len(),
                    failed = report.failed.len(),
                    "fan-out had failed sends"
                );
            }
        });
    }
}
