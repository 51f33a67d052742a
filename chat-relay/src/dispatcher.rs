//! Routing rules shared by the stream and datagram paths.
//!
//! Each call takes the registry lock once and holds it for the whole
//! fan-out, so the per-recipient writes of one broadcast never interleave
//! with another broadcast's writes to the same recipient. A recipient whose
//! socket blocks stalls the caller for as long as the write takes.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    message::{self, StreamCommand},
    registry::{Registry, Sessions},
};

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Delivers `[HH:MM:SS] text` to every session except `exclude`.
    ///
    /// Returns the number of successful deliveries. A failed write is logged
    /// and skipped.
    pub async fn broadcast(&self, text: &str, exclude: Option<&str>) -> usize {
        let line = message::timestamped(text);
        let mut sessions = self.registry.lock().await;
        let mut delivered = 0;

        for (identity, record) in sessions.iter_mut() {
            if Some(identity.as_str()) == exclude {
                continue;
            }
            match record.handle_mut().send_line(&line).await {
                Ok(()) => delivered += 1,
                Err(error) => warn!(identity = %identity, ?error, "failed to deliver broadcast"),
            }
        }

        delivered
    }

    /// Delivers a private line to `recipient`, or a not-found notice back to
    /// `sender` when there is no such recipient.
    pub async fn send_private(&self, recipient: &str, text: &str, sender: &str) {
        let line = message::timestamped(&format!("{sender} (private): {text}"));
        let mut sessions = self.registry.lock().await;

        if sessions.contains_key(recipient) {
            deliver(&mut sessions, recipient, &line).await;
        } else {
            debug!(sender, recipient, "private message recipient not found");
            deliver(&mut sessions, sender, &message::not_found_notice(recipient)).await;
        }
    }

    /// Sends the directory listing to `identity` over its stream.
    pub async fn send_users(&self, identity: &str) {
        let mut sessions = self.registry.lock().await;
        let identities: Vec<&str> = sessions.keys().map(String::as_str).collect();
        let line = message::active_users(&identities);
        deliver(&mut sessions, identity, &line).await;
    }

    /// Applies the stream routing rules to one line from `sender`.
    pub async fn route_stream_message(&self, sender: &str, line: &str) {
        match StreamCommand::parse(line) {
            StreamCommand::Private { recipient, text } => {
                self.send_private(recipient, text, sender).await;
            }
            StreamCommand::Broadcast { text } => {
                self.broadcast(&format!("[Broadcast] {sender}: {text}"), Some(sender))
                    .await;
            }
            StreamCommand::Users => self.send_users(sender).await,
            StreamCommand::Chat { text } => {
                self.broadcast(&format!("{sender}: {text}"), Some(sender))
                    .await;
            }
            StreamCommand::Ignored => debug!(sender, line, "ignoring malformed private message"),
        }
    }
}

async fn deliver(sessions: &mut Sessions, identity: &str, line: &str) {
    let Some(record) = sessions.get_mut(identity) else {
        debug!(identity, "recipient left before delivery");
        return;
    };
    if let Err(error) = record.handle_mut().send_line(line).await {
        warn!(identity, ?error, "failed to deliver message");
    }
}
