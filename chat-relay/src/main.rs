use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use chat_relay::{
    cli::{Cli, Command, ServeArgs},
    client,
    config::RelayConfig,
    console, logging,
    server::Relay,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Client(args) => {
            logging::init_tracing();
            client::run(args).await?;
        }
        Command::Send(args) => {
            logging::init_tracing();
            client::send(args).await?;
        }
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let _log_guard = logging::init_with_file(&args.log_file)?;

    let config = RelayConfig::load(&args.config);
    info!(
        "starting chat relay on {} (datagram port {})",
        config.stream_addr(),
        config.datagram_port
    );

    let relay = Relay::bind(&config).await?;
    info!("stream transport listening on {}", relay.stream_addr()?);
    info!("datagram transport listening on {}", relay.datagram_addr()?);
    println!("Type 'exit' to stop the server.");

    let console = console::spawn_stdin_reader();
    if let Err(err) = relay.run_until(console::wait_for_exit(console)).await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
