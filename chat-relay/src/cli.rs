use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_CLIENT_CONFIG, DEFAULT_SERVER_CONFIG};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay on its stream and datagram transports.
    Serve(ServeArgs),
    /// Connect to a relay over the stream transport and chat interactively.
    Client(ClientArgs),
    /// Send a single datagram to a relay.
    Send(SendArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Configuration file with ServerIp, ServerPort and UdpPort entries.
    #[arg(long, default_value = DEFAULT_SERVER_CONFIG)]
    pub config: PathBuf,

    /// Append-only operational log.
    #[arg(long, default_value = "server.log")]
    pub log_file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Configuration file with ServerIp and ServerPort entries.
    #[arg(long, default_value = DEFAULT_CLIENT_CONFIG)]
    pub config: PathBuf,

    /// Stream address of the relay; overrides the configuration file.
    #[arg(long)]
    pub server: Option<SocketAddr>,

    /// Answer the username prompt automatically.
    #[arg(long)]
    pub username: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Configuration file with ServerIp and UdpPort entries.
    #[arg(long, default_value = DEFAULT_CLIENT_CONFIG)]
    pub config: PathBuf,

    /// Datagram address of the relay; overrides the configuration file.
    #[arg(long)]
    pub server: Option<SocketAddr>,

    /// Local address to send from. The relay identifies datagram senders by
    /// this address, so reuse it to keep the same identity.
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Message text, or `/users` to request the directory listing.
    pub message: String,
}
