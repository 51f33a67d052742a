use std::io;

use chrono::Local;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

pub const USERNAME_PROMPT: &str = "Enter your username:";
pub const INVALID_USERNAME: &str = "Invalid username. Disconnecting...";
pub const USERNAME_TAKEN: &str = "Username already in use. Disconnecting...";
pub const USERS_COMMAND: &str = "/users";
pub const BROADCAST_PREFIX: &str = "!broadcast";

/// A line received on a stream session, classified by routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCommand<'a> {
    /// `@recipient text`
    Private { recipient: &'a str, text: &'a str },
    /// `!broadcast text`
    Broadcast { text: &'a str },
    /// `/users`, any case.
    Users,
    /// Anything else is ordinary chat.
    Chat { text: &'a str },
    /// `@recipient` with no message body.
    Ignored,
}

impl<'a> StreamCommand<'a> {
    /// Classifies one line, applying the rules in priority order.
    pub fn parse(line: &'a str) -> Self {
        if let Some(rest) = line.strip_prefix('@') {
            return match rest.split_once(' ') {
                Some((recipient, text)) => StreamCommand::Private {
                    recipient: recipient.trim(),
                    text,
                },
                None => StreamCommand::Ignored,
            };
        }

        if let Some(rest) = line.strip_prefix(BROADCAST_PREFIX) {
            return StreamCommand::Broadcast { text: rest.trim() };
        }

        if is_users_command(line) {
            return StreamCommand::Users;
        }

        StreamCommand::Chat { text: line }
    }
}

pub fn is_users_command(text: &str) -> bool {
    text.eq_ignore_ascii_case(USERS_COMMAND)
}

/// Prefixes `text` with the current local time as `[HH:MM:SS] `.
pub fn timestamped(text: &str) -> String {
    format!("[{}] {text}", Local::now().format("%H:%M:%S"))
}

pub fn active_users<S: AsRef<str>>(identities: &[S]) -> String {
    let names: Vec<&str> = identities.iter().map(|identity| identity.as_ref()).collect();
    format!("Active users: {}", names.join(", "))
}

pub fn joined_notice(identity: &str) -> String {
    format!("Server: {identity} joined the chat.")
}

pub fn left_notice(identity: &str) -> String {
    format!("Server: {identity} left the chat.")
}

pub fn not_found_notice(recipient: &str) -> String {
    format!("User {recipient} not found.")
}

/// Reads one line, stripping the terminator. Returns `None` at end of stream.
///
/// Invalid UTF-8 is replaced with U+FFFD instead of failing the read.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let bytes = reader.read_until(b'\n', &mut raw).await?;
    if bytes == 0 {
        return Ok(None);
    }
    let mut line = String::from_utf8_lossy(&raw).into_owned();
    let trimmed = line.trim_end_matches(LINE_ENDINGS).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

/// Writes `line` plus a newline and flushes, so interactive peers see it at once.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_message_splits_on_first_space() {
        assert_eq!(
            StreamCommand::parse("@bob hello there"),
            StreamCommand::Private {
                recipient: "bob",
                text: "hello there"
            }
        );
    }

    #[test]
    fn private_message_without_body_is_ignored() {
        assert_eq!(StreamCommand::parse("@bob"), StreamCommand::Ignored);
    }

    #[test]
    fn broadcast_prefix_is_stripped_and_trimmed() {
        assert_eq!(
            StreamCommand::parse("!broadcast   all hands  "),
            StreamCommand::Broadcast { text: "all hands" }
        );
        assert_eq!(
            StreamCommand::parse("!broadcast"),
            StreamCommand::Broadcast { text: "" }
        );
    }

    #[test]
    fn users_command_is_case_insensitive() {
        assert_eq!(StreamCommand::parse("/USERS"), StreamCommand::Users);
        assert_eq!(StreamCommand::parse("/Users"), StreamCommand::Users);
        assert_eq!(
            StreamCommand::parse("/users please"),
            StreamCommand::Chat {
                text: "/users please"
            }
        );
    }

    #[test]
    fn at_sign_takes_priority_over_other_rules() {
        assert_eq!(
            StreamCommand::parse("@/users !broadcast"),
            StreamCommand::Private {
                recipient: "/users",
                text: "!broadcast"
            }
        );
    }

    #[test]
    fn active_users_joins_with_comma_space() {
        assert_eq!(active_users(&["alice", "bob"]), "Active users: alice, bob");
        assert_eq!(active_users::<&str>(&[]), "Active users: ");
    }

    #[test]
    fn timestamp_has_clock_prefix() {
        let line = timestamped("hi");
        let bytes = line.as_bytes();
        assert_eq!(bytes[0], b'[');
        assert_eq!(bytes[3], b':');
        assert_eq!(bytes[6], b':');
        assert_eq!(&line[9..], "] hi");
    }

    #[tokio::test]
    async fn line_roundtrip_strips_crlf() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        writer.write_all(b"hello\r\n").await.expect("write raw");
        write_line(&mut writer, "").await.expect("write empty");
        drop(writer);

        assert_eq!(
            read_line(&mut reader).await.expect("read"),
            Some("hello".to_string())
        );
        assert_eq!(
            read_line(&mut reader).await.expect("read"),
            Some(String::new())
        );
        assert_eq!(read_line(&mut reader).await.expect("read"), None);
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_replaced_not_rejected() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        writer.write_all(b"caf\xe9\r\nnext\n").await.expect("write raw");
        drop(writer);

        assert_eq!(
            read_line(&mut reader).await.expect("read"),
            Some("caf\u{FFFD}".to_string())
        );
        assert_eq!(
            read_line(&mut reader).await.expect("read"),
            Some("next".to_string())
        );
    }
}
