//! Per-connection stream session: handshake, message loop, teardown.

use std::{io, net::SocketAddr};

use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    dispatcher::Dispatcher,
    error::RegisterError,
    message::{self, read_line},
    registry::StreamHandle,
};

/// Result of one cancellable read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    Eof,
    Cancelled,
}

async fn read_or_cancel<R>(reader: &mut R, cancel: &CancellationToken) -> io::Result<ReadOutcome>
where
    R: AsyncBufRead + Unpin,
{
    select! {
        _ = cancel.cancelled() => Ok(ReadOutcome::Cancelled),
        line = read_line(reader) => Ok(match line? {
            Some(line) => ReadOutcome::Line(line),
            None => ReadOutcome::Eof,
        }),
    }
}

pub struct StreamSession<R> {
    reader: R,
    peer: Option<SocketAddr>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
}

impl<R> StreamSession<R>
where
    R: AsyncBufRead + Unpin,
{
    /// `cancel` should be a child of the relay's shutdown token.
    pub fn new(
        reader: R,
        peer: Option<SocketAddr>,
        dispatcher: Dispatcher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader,
            peer,
            dispatcher,
            cancel,
        }
    }

    /// Drives the session to completion. The outbound `writer` is closed on
    /// every exit path: directly when the handshake fails, otherwise by
    /// whoever removes the record from the registry.
    pub async fn run<W>(mut self, writer: W)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let peer = self.peer;
        let Some(identity) = self.await_identity(StreamHandle::new(writer)).await else {
            debug!(?peer, "session closed during handshake");
            return;
        };

        info!(?peer, identity = %identity, "client connected");
        self.dispatcher
            .broadcast(&message::joined_notice(&identity), Some(&identity))
            .await;

        if let Err(error) = self.pump(&identity).await {
            warn!(?peer, identity = %identity, ?error, "stream read failed");
        }

        self.close(&identity).await;
    }

    async fn await_identity(&mut self, mut handle: StreamHandle) -> Option<String> {
        if let Err(error) = handle.send_line(message::USERNAME_PROMPT).await {
            debug!(peer = ?self.peer, ?error, "failed to send prompt");
            close_handle(handle).await;
            return None;
        }

        let candidate = match read_or_cancel(&mut self.reader, &self.cancel).await {
            Ok(ReadOutcome::Line(line)) => line.trim().to_string(),
            Ok(ReadOutcome::Eof) => String::new(),
            Ok(ReadOutcome::Cancelled) => {
                close_handle(handle).await;
                return None;
            }
            Err(error) => {
                warn!(peer = ?self.peer, ?error, "failed to read username");
                close_handle(handle).await;
                return None;
            }
        };

        if candidate.is_empty() {
            reject(handle, message::INVALID_USERNAME).await;
            return None;
        }

        let registry = self.dispatcher.registry();
        match registry
            .register(&candidate, handle, self.cancel.clone())
            .await
        {
            Ok(_) => Some(candidate),
            Err(RegisterError::Duplicate { identity, handle }) => {
                info!(peer = ?self.peer, identity = %identity, "rejected duplicate username");
                reject(handle, message::USERNAME_TAKEN).await;
                None
            }
            Err(error @ RegisterError::ShuttingDown { .. }) => {
                debug!(peer = ?self.peer, identity = %candidate, "registration refused during shutdown");
                close_handle(error.into_handle()).await;
                None
            }
        }
    }

    async fn pump(&mut self, identity: &str) -> io::Result<()> {
        loop {
            match read_or_cancel(&mut self.reader, &self.cancel).await? {
                ReadOutcome::Line(line) => {
                    self.dispatcher.route_stream_message(identity, &line).await;
                }
                ReadOutcome::Eof | ReadOutcome::Cancelled => return Ok(()),
            }
        }
    }

    /// A cancelled session is being torn down by shutdown and leaves
    /// silently; otherwise its departure is announced to everyone left.
    async fn close(&mut self, identity: &str) {
        // Read before `record.close`, which cancels the token itself.
        let shutting_down = self.cancel.is_cancelled();

        let registry = self.dispatcher.registry();
        let Some(record) = registry.unregister(identity).await else {
            debug!(identity, "session already removed by shutdown");
            return;
        };
        record.close(identity).await;

        if shutting_down {
            debug!(identity, "session ended by shutdown");
            return;
        }

        info!(peer = ?self.peer, identity, "client disconnected");
        self.dispatcher
            .broadcast(&message::left_notice(identity), None)
            .await;
    }
}

async fn reject(mut handle: StreamHandle, reason: &str) {
    if let Err(error) = handle.send_line(reason).await {
        debug!(?error, "failed to send rejection");
    }
    close_handle(handle).await;
}

async fn close_handle(mut handle: StreamHandle) {
    if let Err(error) = handle.close().await {
        debug!(?error, "stream handle was already closed");
    }
}
