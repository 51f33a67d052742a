//! Datagram transport: one loop, one socket.
//!
//! Senders are identified only by their origin address. The first datagram
//! from an unknown address binds it to a stream session that has no
//! datagram address yet.

use std::net::SocketAddr;

use tokio::{net::UdpSocket, select};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    dispatcher::Dispatcher,
    error::RegistryError,
    message::{self, is_users_command},
};

/// Largest payload a UDP datagram can carry.
pub const MAX_DATAGRAM_LEN: usize = 65_535;

/// What the router did with one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// Reply to send back to the origin address.
    Reply(String),
    /// Broadcast to everyone except the resolved sender.
    Broadcast { identity: String },
    /// Sender could not be resolved to any session.
    Dropped,
}

pub struct DatagramRouter {
    socket: UdpSocket,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl DatagramRouter {
    pub fn new(socket: UdpSocket, dispatcher: Dispatcher, shutdown: CancellationToken) -> Self {
        Self {
            socket,
            dispatcher,
            shutdown,
        }
    }

    /// Receives until `shutdown` fires. The socket is closed when the router
    /// is dropped on return.
    pub async fn run(self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        loop {
            let (len, from) = select! {
                _ = self.shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(error) => {
                        warn!(?error, "datagram receive failed");
                        continue;
                    }
                },
            };

            let payload = String::from_utf8_lossy(&buf[..len]).into_owned();
            if let DatagramOutcome::Reply(reply) =
                route_datagram(&self.dispatcher, &payload, from).await
            {
                if let Err(error) = self.socket.send_to(reply.as_bytes(), from).await {
                    warn!(peer = %from, ?error, "failed to send datagram reply");
                }
            }
        }

        info!("datagram router stopped");
    }
}

/// Resolves the sender of `payload` and applies the datagram routing rules.
pub async fn route_datagram(
    dispatcher: &Dispatcher,
    payload: &str,
    from: SocketAddr,
) -> DatagramOutcome {
    let Some(identity) = resolve_sender(dispatcher, from).await else {
        return DatagramOutcome::Dropped;
    };

    if is_users_command(payload) {
        let identities = dispatcher.registry().all_identities().await;
        return DatagramOutcome::Reply(message::active_users(&identities));
    }

    dispatcher
        .broadcast(&format!("{identity}: {payload}"), Some(&identity))
        .await;
    DatagramOutcome::Broadcast { identity }
}

async fn resolve_sender(dispatcher: &Dispatcher, from: SocketAddr) -> Option<String> {
    let registry = dispatcher.registry();
    if let Ok(identity) = registry.identity_for_address(from).await {
        return Some(identity);
    }

    match registry.bind_datagram_address(from).await {
        Ok(identity) => {
            info!(peer = %from, identity = %identity, "datagram sender bound");
            Some(identity)
        }
        Err(RegistryError::NoUnboundSession) => {
            warn!(peer = %from, "dropping datagram from unregistered sender");
            None
        }
        Err(error) => {
            debug!(peer = %from, ?error, "datagram sender lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::{
        io::{BufReader, DuplexStream, duplex},
        time::timeout,
    };

    use super::*;
    use crate::{
        message::read_line,
        registry::{Registry, StreamHandle},
    };

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn join(dispatcher: &Dispatcher, identity: &str) -> BufReader<DuplexStream> {
        let (local, remote) = duplex(4096);
        dispatcher
            .registry()
            .register(identity, StreamHandle::new(local), CancellationToken::new())
            .await
            .expect("register");
        BufReader::new(remote)
    }

    #[tokio::test]
    async fn first_datagram_binds_unbound_session() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        let _carol = join(&dispatcher, "carol").await;

        let outcome = route_datagram(&dispatcher, "/users", addr(6000)).await;
        assert_eq!(outcome, DatagramOutcome::Reply("Active users: carol".into()));

        let carol = dispatcher.registry().lookup("carol").await.expect("carol");
        assert_eq!(carol.datagram_addr, Some(addr(6000)));
    }

    #[tokio::test]
    async fn second_unknown_sender_is_dropped_when_nobody_is_unbound() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        let mut carol = join(&dispatcher, "carol").await;

        route_datagram(&dispatcher, "/users", addr(6000)).await;
        let outcome = route_datagram(&dispatcher, "hello", addr(6001)).await;
        assert_eq!(outcome, DatagramOutcome::Dropped);

        let silent = timeout(Duration::from_millis(50), read_line(&mut carol)).await;
        assert!(silent.is_err(), "carol should receive nothing");
    }

    #[tokio::test]
    async fn datagram_chat_is_broadcast_excluding_sender() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        let mut alice = join(&dispatcher, "alice").await;
        let mut bob = join(&dispatcher, "bob").await;

        let outcome = route_datagram(&dispatcher, "hi from udp", addr(7000)).await;
        assert_eq!(
            outcome,
            DatagramOutcome::Broadcast {
                identity: "alice".into()
            }
        );

        let line = timeout(Duration::from_secs(1), read_line(&mut bob))
            .await
            .expect("bob timed out")
            .expect("read")
            .expect("line");
        assert!(line.ends_with("] alice: hi from udp"), "{line}");

        let silent = timeout(Duration::from_millis(50), read_line(&mut alice)).await;
        assert!(silent.is_err(), "sender should not hear itself");
    }

    #[tokio::test]
    async fn bound_sender_keeps_its_identity() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        let _alice = join(&dispatcher, "alice").await;
        let _bob = join(&dispatcher, "bob").await;

        route_datagram(&dispatcher, "one", addr(7000)).await;
        let outcome = route_datagram(&dispatcher, "two", addr(7000)).await;
        assert_eq!(
            outcome,
            DatagramOutcome::Broadcast {
                identity: "alice".into()
            }
        );
        let bob = dispatcher.registry().lookup("bob").await.expect("bob");
        assert_eq!(bob.datagram_addr, None);
    }
}
