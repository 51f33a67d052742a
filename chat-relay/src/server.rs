use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream, UdpSocket},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::RelayConfig, datagram::DatagramRouter, dispatcher::Dispatcher,
    lifecycle::LifecycleController, registry::Registry, session::StreamSession,
};

/// A bound relay: stream listener, datagram socket and the shared directory.
pub struct Relay {
    listener: TcpListener,
    socket: UdpSocket,
    dispatcher: Dispatcher,
    controller: LifecycleController,
}

impl Relay {
    pub fn new(listener: TcpListener, socket: UdpSocket) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            listener,
            socket,
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            controller: LifecycleController::new(registry),
        }
    }

    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let stream_addr = config.stream_addr();
        let listener = TcpListener::bind(stream_addr)
            .await
            .with_context(|| format!("failed to bind stream transport on {stream_addr}"))?;

        let datagram_addr = config.datagram_addr();
        let socket = UdpSocket::bind(datagram_addr)
            .await
            .with_context(|| format!("failed to bind datagram transport on {datagram_addr}"))?;

        Ok(Self::new(listener, socket))
    }

    pub fn stream_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn datagram_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.dispatcher.registry())
    }

    pub fn controller(&self) -> LifecycleController {
        self.controller.clone()
    }

    /// Serves both transports until the controller is stopped.
    pub async fn run(self) -> Result<()> {
        let Relay {
            listener,
            socket,
            dispatcher,
            controller,
        } = self;
        let shutdown = controller.shutdown_token();

        let router = DatagramRouter::new(socket, dispatcher.clone(), shutdown.clone());
        let router = tokio::spawn(router.run());

        loop {
            select! {
                _ = shutdown.cancelled() => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &dispatcher, &shutdown);
                }
            }
        }

        drop(listener);
        info!("stopped accepting stream clients");

        router.await.context("datagram router task failed")?;
        Ok(())
    }

    /// Serves until `shutdown` resolves, then stops the relay and waits for
    /// both loops to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let controller = self.controller();
        let server = tokio::spawn(self.run());

        shutdown.await;
        controller.stop().await;

        server.await.context("relay task failed")?
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    dispatcher: &Dispatcher,
    shutdown: &CancellationToken,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, dispatcher, shutdown),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: &Dispatcher,
    shutdown: &CancellationToken,
) {
    info!(%peer, "stream client connected");
    let (reader, writer) = stream.into_split();
    let session = StreamSession::new(
        BufReader::new(reader),
        Some(peer),
        dispatcher.clone(),
        shutdown.child_token(),
    );
    tokio::spawn(session.run(writer));
}
