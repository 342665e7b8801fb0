use std::{io, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{Console, Uplink, deliver_inbound};
use crate::{
    codec::{decode, read_line, write_frame},
    presence::Presence,
};

pub(super) struct TcpUplink {
    writer: OwnedWriteHalf,
}

impl Uplink for TcpUplink {
    // The relay tags lines with our alias itself.
    async fn send_chat(&mut self, text: &str) -> io::Result<()> {
        write_frame(&mut self.writer, text.as_bytes()).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Connects and sends the alias line.
pub(super) async fn connect(
    server: &str,
    alias: &str,
) -> Result<(TcpUplink, BufReader<OwnedReadHalf>)> {
    let stream = TcpStream::connect(server)
        .await
        .with_context(|| format!("failed to connect to {server}"))?;
    info!("connected to {}", server);

    let (reader, mut writer) = stream.into_split();
    write_frame(&mut writer, alias.as_bytes())
        .await
        .context("failed to send alias")?;

    Ok((TcpUplink { writer }, BufReader::new(reader)))
}

pub(super) fn spawn_receiver(
    mut reader: BufReader<OwnedReadHalf>,
    presence: Arc<Presence>,
    console: Arc<Console>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let line = match read_line(&mut reader).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(error) => {
                    debug!(?error, "failed to read from relay");
                    break;
                }
            };

            if let Err(error) = deliver_inbound(decode(&line), &presence, &console).await {
                warn!(?error, "failed to render message");
                return;
            }
        }

        let _ = console.connection_closed().await;
    })
}
