//! Directory of connected identities.
//!
//! Every read and write goes through one `tokio::sync::Mutex`. The map is
//! ordered so that iteration, and therefore datagram binding and the
//! directory listing, is deterministic.

use std::{collections::BTreeMap, io, net::SocketAddr};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Mutex, MutexGuard},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{RegisterError, RegistryError},
    message::write_line,
};

pub(crate) type Sessions = BTreeMap<String, SessionRecord>;

/// Outbound half of a stream session. The registry only ever writes to it.
pub struct StreamHandle {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl StreamHandle {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Box::new(writer),
        }
    }

    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        write_line(&mut self.writer, line).await
    }

    pub async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

pub struct SessionRecord {
    handle: StreamHandle,
    datagram_addr: Option<SocketAddr>,
    cancel: CancellationToken,
}

impl SessionRecord {
    pub fn datagram_addr(&self) -> Option<SocketAddr> {
        self.datagram_addr
    }

    pub(crate) fn handle_mut(&mut self) -> &mut StreamHandle {
        &mut self.handle
    }

    /// Cancels the owning session and shuts the outbound stream down.
    pub async fn close(mut self, identity: &str) {
        self.cancel.cancel();
        if let Err(error) = self.handle.close().await {
            debug!(identity, ?error, "stream handle was already closed");
        }
    }
}

/// Point-in-time view of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub identity: String,
    pub datagram_addr: Option<SocketAddr>,
}

#[derive(Default)]
pub struct Registry {
    sessions: Mutex<Sessions>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record for `identity` unless one already exists.
    ///
    /// `cancel` is the session's own token; cancelling it (on shutdown)
    /// unblocks the session's pending read. A token that is already cancelled
    /// is refused under the lock, so nothing can slip in after `close_all`.
    pub async fn register(
        &self,
        identity: &str,
        handle: StreamHandle,
        cancel: CancellationToken,
    ) -> Result<SessionSnapshot, RegisterError> {
        let mut sessions = self.sessions.lock().await;

        if cancel.is_cancelled() {
            return Err(RegisterError::ShuttingDown { handle });
        }

        if sessions.contains_key(identity) {
            return Err(RegisterError::Duplicate {
                identity: identity.to_string(),
                handle,
            });
        }

        sessions.insert(
            identity.to_string(),
            SessionRecord {
                handle,
                datagram_addr: None,
                cancel,
            },
        );

        Ok(SessionSnapshot {
            identity: identity.to_string(),
            datagram_addr: None,
        })
    }

    /// Removes and returns the record, or `None` when it was already gone.
    pub async fn unregister(&self, identity: &str) -> Option<SessionRecord> {
        self.sessions.lock().await.remove(identity)
    }

    pub async fn lookup(&self, identity: &str) -> Result<SessionSnapshot, RegistryError> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(identity)
            .map(|record| SessionSnapshot {
                identity: identity.to_string(),
                datagram_addr: record.datagram_addr,
            })
            .ok_or_else(|| RegistryError::NotFound(identity.to_string()))
    }

    pub async fn all_identities(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Identity already bound to `addr`, if any.
    pub async fn identity_for_address(&self, addr: SocketAddr) -> Result<String, RegistryError> {
        let sessions = self.sessions.lock().await;
        bound_identity(&sessions, addr).ok_or_else(|| RegistryError::NotFound(addr.to_string()))
    }

    /// Binds `addr` to the first record (in identity order) that has no
    /// datagram address yet. An address that is already bound resolves to its
    /// identity without mutation.
    ///
    /// The sender is not verified: any new address claims whichever session
    /// happens to be unbound.
    pub async fn bind_datagram_address(&self, addr: SocketAddr) -> Result<String, RegistryError> {
        let mut sessions = self.sessions.lock().await;

        if let Some(identity) = bound_identity(&sessions, addr) {
            return Ok(identity);
        }

        let (identity, record) = sessions
            .iter_mut()
            .find(|(_, record)| record.datagram_addr.is_none())
            .ok_or(RegistryError::NoUnboundSession)?;
        record.datagram_addr = Some(addr);
        Ok(identity.clone())
    }

    /// Closes every stream handle and empties the directory. Returns how many
    /// sessions were closed.
    pub async fn close_all(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let drained = std::mem::take(&mut *sessions);
        let count = drained.len();
        for (identity, record) in drained {
            record.close(&identity).await;
        }
        count
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().await
    }
}

fn bound_identity(sessions: &Sessions, addr: SocketAddr) -> Option<String> {
    sessions
        .iter()
        .find(|(_, record)| record.datagram_addr == Some(addr))
        .map(|(identity, _)| identity.clone())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    use super::*;

    fn handle() -> (StreamHandle, DuplexStream) {
        let (local, remote) = duplex(1024);
        (StreamHandle::new(local), remote)
    }

    async fn register(registry: &Registry, identity: &str) -> (DuplexStream, CancellationToken) {
        let (handle, remote) = handle();
        let cancel = CancellationToken::new();
        registry
            .register(identity, handle, cancel.clone())
            .await
            .expect("registration should pass");
        (remote, cancel)
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn rejects_duplicate_identity_and_keeps_original() {
        let registry = Registry::new();
        let (_alice, _) = register(&registry, "alice").await;
        registry
            .bind_datagram_address(addr(4000))
            .await
            .expect("bind alice");

        let (second, _remote) = handle();
        let err = registry
            .register("alice", second, CancellationToken::new())
            .await
            .expect_err("duplicate must be rejected");
        assert!(
            matches!(&err, RegisterError::Duplicate { identity, .. } if identity == "alice"),
            "{err:?}"
        );

        let snapshot = registry.lookup("alice").await.expect("alice still present");
        assert_eq!(snapshot.datagram_addr, Some(addr(4000)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn cancelled_token_is_refused_after_close_all() {
        let registry = Registry::new();
        let shutdown = CancellationToken::new();
        let (_alice, _) = register(&registry, "alice").await;

        shutdown.cancel();
        assert_eq!(registry.close_all().await, 1);

        let (late, _remote) = handle();
        let err = registry
            .register("bob", late, shutdown.child_token())
            .await
            .expect_err("registration after shutdown must be refused");
        assert!(matches!(err, RegisterError::ShuttingDown { .. }), "{err:?}");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn identities_are_case_sensitive() {
        let registry = Registry::new();
        let (_a, _) = register(&registry, "alice").await;
        let (_b, _) = register(&registry, "Alice").await;
        assert_eq!(registry.all_identities().await, vec!["Alice", "alice"]);
    }

    #[tokio::test]
    async fn unregister_missing_identity_is_noop() {
        let registry = Registry::new();
        let (_alice, _) = register(&registry, "alice").await;

        assert!(registry.unregister("bob").await.is_none());
        assert!(registry.unregister("alice").await.is_some());
        assert!(registry.unregister("alice").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn lookup_miss_is_not_found() {
        let registry = Registry::new();
        assert_eq!(
            registry.lookup("ghost").await,
            Err(RegistryError::NotFound("ghost".into()))
        );
    }

    #[tokio::test]
    async fn binding_claims_first_unbound_then_reuses_it() {
        let registry = Registry::new();
        let (_carol, _) = register(&registry, "carol").await;
        let (_bob, _) = register(&registry, "bob").await;

        assert_eq!(registry.bind_datagram_address(addr(5000)).await, Ok("bob".to_string()));
        assert_eq!(registry.bind_datagram_address(addr(5000)).await, Ok("bob".to_string()));
        assert_eq!(registry.bind_datagram_address(addr(5001)).await, Ok("carol".to_string()));
        assert_eq!(
            registry.bind_datagram_address(addr(5002)).await,
            Err(RegistryError::NoUnboundSession)
        );

        assert_eq!(registry.identity_for_address(addr(5001)).await, Ok("carol".to_string()));
        assert!(registry.identity_for_address(addr(5002)).await.is_err());
    }

    #[tokio::test]
    async fn close_all_cancels_sessions_and_clears() {
        let registry = Registry::new();
        let (mut alice, alice_cancel) = register(&registry, "alice").await;
        let (mut bob, bob_cancel) = register(&registry, "bob").await;

        assert_eq!(registry.close_all().await, 2);
        assert!(registry.is_empty().await);
        assert!(alice_cancel.is_cancelled());
        assert!(bob_cancel.is_cancelled());

        let mut buf = Vec::new();
        assert_eq!(alice.read_to_end(&mut buf).await.expect("alice eof"), 0);
        assert_eq!(bob.read_to_end(&mut buf).await.expect("bob eof"), 0);
    }
}
