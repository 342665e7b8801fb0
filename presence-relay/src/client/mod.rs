//! Interactive client: one task reconciles and renders inbound frames while
//! the main task reads user input. Both share the presence view.

mod console;
mod tcp;
mod udp;

use std::{io, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    select,
};
use tracing::{debug, warn};

pub use console::Console;

use crate::{
    cli::{ClientArgs, Transport},
    codec::{DecodedEvent, normalize_alias},
    commands::Input,
    presence::Presence,
};

/// Outbound half of a session.
trait Uplink {
    async fn send_chat(&mut self, text: &str) -> io::Result<()>;
    /// Tells the relay we are gone and releases the transport.
    async fn close(&mut self) -> io::Result<()>;
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let alias = normalize_alias(&args.alias);
    let presence = Arc::new(Presence::new(alias.clone()));
    let console = Arc::new(Console::new(args.color_enabled(), !args.no_bell));
    let server = args.server_addr();

    match args.transport {
        Transport::Tcp => {
            let (uplink, downlink) = tcp::connect(&server, &alias).await?;
            console.banner("TCP", &alias, &server).await?;
            let receiver =
                tcp::spawn_receiver(downlink, Arc::clone(&presence), Arc::clone(&console));
            run_session(uplink, receiver, &presence, &console).await
        }
        Transport::Udp => {
            let socket = udp::connect(&server, &alias).await?;
            console.banner("UDP", &alias, &server).await?;
            let receiver = udp::spawn_receiver(
                Arc::clone(&socket),
                Arc::clone(&presence),
                Arc::clone(&console),
            );
            let uplink = udp::UdpUplink::new(socket, alias);
            run_session(uplink, receiver, &presence, &console).await
        }
    }
}

async fn run_session<U: Uplink>(
    mut uplink: U,
    receiver: tokio::task::JoinHandle<()>,
    presence: &Presence,
    console: &Console,
) -> Result<()> {
    let result = run_input_loop(&mut uplink, presence, console).await;

    if let Err(error) = uplink.close().await {
        warn!(?error, "failed to close connection cleanly");
    }
    receiver.abort();

    result
}

async fn run_input_loop<U: Uplink>(
    uplink: &mut U,
    presence: &Presence,
    console: &Console,
) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, uplink, presence, console).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                console.info("Exiting chat...").await?;
                break;
            }
        }
    }
    Ok(())
}

async fn handle_stdin_input<U: Uplink>(
    bytes_read: io::Result<usize>,
    input: &str,
    uplink: &mut U,
    presence: &Presence,
    console: &Console,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    match Input::parse(input) {
        Input::Quit => {
            console.info("Exiting chat...").await?;
            return Ok(false);
        }
        Input::Clear => console.clear().await?,
        Input::Users => {
            let users = presence.users().await;
            console.users(&users, presence.me()).await?;
        }
        Input::Unknown(command) => {
            debug!(%command, "unknown command");
            console.info("Unknown command.").await?;
            console.help().await?;
        }
        Input::Message(text) => {
            uplink.send_chat(&text).await?;
            console.own(&text).await?;
        }
        Input::Empty => {}
    }
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

/// Applies one inbound event to the presence view and renders the result.
async fn deliver_inbound(
    event: DecodedEvent,
    presence: &Presence,
    console: &Console,
) -> io::Result<()> {
    let update = presence.apply(event).await;
    console.render(update).await
}
