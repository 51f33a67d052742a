use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream, UdpSocket,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    time::timeout,
};
use tracing::{info, warn};

use crate::{
    cli::{ClientArgs, SendArgs},
    config::RelayConfig,
    datagram::MAX_DATAGRAM_LEN,
    message::{USERNAME_PROMPT, is_users_command, read_line, write_line},
};

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn run(args: ClientArgs) -> Result<()> {
    let server = match args.server {
        Some(server) => server,
        None => RelayConfig::load(&args.config).stream_addr(),
    };
    let (mut reader, mut writer) = establish_connection(server).await?;
    write_stdout("Connected to the server.").await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    let mut username = args.username;

    run_client_loop(&mut reader, &mut writer, &mut stdin, &mut input, &mut username).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(server: SocketAddr) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(server)
        .await
        .with_context(|| format!("failed to connect to {server}"))?;

    info!("connected to {}", server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn run_client_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
    username: &mut Option<String>,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            server_line = read_line(reader) => {
                if !handle_server_line(server_line, writer, username).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line(
    line: io::Result<Option<String>>,
    writer: &mut OwnedWriteHalf,
    username: &mut Option<String>,
) -> Result<bool> {
    let Some(line) = line? else {
        write_stdout("*** server closed the connection").await?;
        return Ok(false);
    };

    write_stdout(&line).await?;
    if line == USERNAME_PROMPT {
        if let Some(name) = username.take() {
            write_line(writer, &name).await?;
        }
    }
    Ok(true)
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    write_line(writer, text).await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

/// Sends one datagram and, for `/users`, prints the reply.
pub async fn send(args: SendArgs) -> Result<()> {
    let server = match args.server {
        Some(server) => server,
        None => RelayConfig::load(&args.config).datagram_addr(),
    };
    let local = args.bind.unwrap_or_else(|| unspecified_for(server));

    let socket = UdpSocket::bind(local)
        .await
        .with_context(|| format!("failed to bind datagram socket on {local}"))?;
    socket
        .send_to(args.message.as_bytes(), server)
        .await
        .with_context(|| format!("failed to send datagram to {server}"))?;
    info!(%server, "datagram sent");

    if !is_users_command(&args.message) {
        return Ok(());
    }

    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    let Ok(received) = timeout(REPLY_TIMEOUT, socket.recv_from(&mut buf)).await else {
        bail!("no reply from {server} within {REPLY_TIMEOUT:?}");
    };
    let (len, _) = received.context("failed to receive reply")?;
    write_stdout(&String::from_utf8_lossy(&buf[..len])).await?;
    Ok(())
}

fn unspecified_for(server: SocketAddr) -> SocketAddr {
    match server {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
