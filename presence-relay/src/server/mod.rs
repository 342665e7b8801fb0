//! Relay servers. Both transports share the registry and broadcaster and
//! differ only in how a peer is identified and reached.

mod tcp;
mod udp;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tracing::warn;

pub use tcp::{Outbox, PeerId, TcpRelay};
pub use udp::{Datagram, MAX_DATAGRAM, UdpRelay};

use crate::cli::{ServerArgs, Transport};

/// Binds the requested transport, announces the bound address on stdout
/// and relays until ctrl-c.
pub async fn run(args: ServerArgs) -> Result<()> {
    let result = match args.transport {
        Transport::Tcp => {
            let listener = TcpListener::bind(args.listen)
                .await
                .with_context(|| format!("failed to bind tcp {}", args.listen))?;
            let relay = TcpRelay::new(listener);
            announce("tcp", relay.local_addr()?);
            relay.run_until_ctrl_c().await
        }
        Transport::Udp => {
            let socket = UdpSocket::bind(args.listen)
                .await
                .with_context(|| format!("failed to bind udp {}", args.listen))?;
            let relay = UdpRelay::new(socket);
            announce("udp", relay.local_addr()?);
            relay.run_until_ctrl_c().await
        }
    };

    if let Err(err) = &result {
        warn!("relay exited with error: {err:?}");
    }
    result
}

fn announce(transport: &str, addr: std::net::SocketAddr) {
    println!("{transport} relay listening on {addr}");
}
