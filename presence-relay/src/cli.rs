use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Port used by both the relay and its clients unless told otherwise.
pub const DEFAULT_PORT: u16 = 5002;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, rebroadcasting every message to the other participants.
    Server(ServerArgs),
    /// Connect to a relay and chat.
    Client(ClientArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// One connection per participant; ordered delivery.
    Tcp,
    /// Datagrams keyed by source address; no delivery or ordering guarantee.
    Udp,
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    #[arg(long, value_enum, default_value_t = Transport::Tcp)]
    pub transport: Transport,

    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:5002")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    #[arg(long, value_enum, default_value_t = Transport::Tcp)]
    pub transport: Transport,

    /// Host name or IP address of the relay.
    #[arg(long, default_value = "127.0.0.1")]
    pub server: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Display name; blank means `Anon`.
    #[arg(long, default_value = "")]
    pub alias: String,

    /// Print without ANSI styling. Also enabled by a non-empty `NO_COLOR`.
    #[arg(long)]
    pub no_color: bool,

    /// Do not ring the terminal bell on incoming messages.
    #[arg(long)]
    pub no_bell: bool,
}

impl ClientArgs {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    pub fn color_enabled(&self) -> bool {
        !self.no_color && std::env::var_os("NO_COLOR").map_or(true, |value| value.is_empty())
    }
}
