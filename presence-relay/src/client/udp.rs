use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
};

use anyhow::{Context, Result};
use tokio::{
    net::{UdpSocket, lookup_host},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{Console, Uplink, deliver_inbound};
use crate::{
    codec::{decode_bytes, encode, encode_hello, encode_leave},
    presence::Presence,
    server::MAX_DATAGRAM,
};

pub(super) struct UdpUplink {
    socket: Arc<UdpSocket>,
    alias: String,
}

impl UdpUplink {
    pub(super) fn new(socket: Arc<UdpSocket>, alias: String) -> Self {
        Self { socket, alias }
    }
}

impl Uplink for UdpUplink {
    async fn send_chat(&mut self, text: &str) -> io::Result<()> {
        let frame = encode(&self.alias, text);
        self.socket.send(frame.as_bytes()).await.map(|_| ())
    }

    async fn close(&mut self) -> io::Result<()> {
        let frame = encode_leave(&self.alias);
        self.socket.send(frame.as_bytes()).await.map(|_| ())
    }
}

/// Binds an ephemeral local port, fixes the relay as the only peer and
/// sends the join announcement.
pub(super) async fn connect(server: &str, alias: &str) -> Result<Arc<UdpSocket>> {
    let remote = lookup_host(server)
        .await
        .with_context(|| format!("failed to resolve {server}"))?
        .next()
        .with_context(|| format!("no address found for {server}"))?;

    let local = match remote {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::bind(local)
        .await
        .context("failed to bind local udp socket")?;
    socket
        .connect(remote)
        .await
        .with_context(|| format!("failed to target {remote}"))?;
    info!("sending to {}", remote);

    socket
        .send(encode_hello(alias).as_bytes())
        .await
        .context("failed to send hello")?;

    Ok(Arc::new(socket))
}

pub(super) fn spawn_receiver(
    socket: Arc<UdpSocket>,
    presence: Arc<Presence>,
    console: Arc<Console>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let len = match socket.recv(&mut buf).await {
                Ok(len) => len,
                // A refused datagram surfaces here once the relay is gone.
                Err(error) => {
                    debug!(?error, "failed to receive datagram");
                    break;
                }
            };

            let event = decode_bytes(&buf[..len]);
            if let Err(error) = deliver_inbound(event, &presence, &console).await {
                warn!(?error, "failed to render message");
                return;
            }
        }

        let _ = console.connection_closed().await;
    })
}
