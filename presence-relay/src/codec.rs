use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Payload announcing that the tagged alias joined.
pub const HELLO: &str = "__HELLO__";
/// Payload announcing that the tagged alias left.
pub const LEAVE: &str = "__LEAVE__";
/// Prefix of the presence seed carried by [`SYSTEM_ALIAS`].
pub const USERS_PREFIX: &str = "__USERS__ ";

/// Alias used by the relay itself for the presence seed.
pub const SYSTEM_ALIAS: &str = "System";
/// Alias assigned to frames that are not `[alias] payload` shaped.
pub const UNKNOWN_ALIAS: &str = "?";
/// Alias used when a user does not pick one.
pub const DEFAULT_ALIAS: &str = "Anon";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Chat(String),
    Hello,
    Leave,
    UserListSeed(Vec<String>),
}

/// One decoded line (TCP) or datagram (UDP).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub alias: String,
    pub kind: EventKind,
}

impl DecodedEvent {
    /// True when the event carries no user-visible text and is not a control marker.
    pub fn is_blank_chat(&self) -> bool {
        matches!(&self.kind, EventKind::Chat(text) if text.trim().is_empty())
    }
}

/// Trims the alias and falls back to [`DEFAULT_ALIAS`] when nothing is left.
pub fn normalize_alias(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_ALIAS.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Builds `[alias] payload` without a line terminator.
///
/// Datagrams are sent as-is; stream writers append the newline through
/// [`write_frame`].
pub fn encode(alias: &str, payload: &str) -> String {
    format!("[{alias}] {payload}")
}

pub fn encode_hello(alias: &str) -> String {
    encode(alias, HELLO)
}

pub fn encode_leave(alias: &str) -> String {
    encode(alias, LEAVE)
}

/// Presence seed sent to a newly joined peer. Names are comma joined as given.
pub fn encode_user_list(aliases: &[String]) -> String {
    encode(SYSTEM_ALIAS, &format!("{USERS_PREFIX}{}", aliases.join(",")))
}

/// Splits `[alias] payload` on the first `"] "` and classifies the payload.
///
/// Text without the leading `[` or without the separator is kept whole
/// as chat from [`UNKNOWN_ALIAS`].
pub fn decode(raw: &str) -> DecodedEvent {
    let text = raw.trim_end_matches(LINE_ENDINGS);
    let (alias, payload) = split_frame(text);

    let kind = if alias == SYSTEM_ALIAS && payload.starts_with(USERS_PREFIX) {
        EventKind::UserListSeed(parse_user_list(&payload[USERS_PREFIX.len()..]))
    } else if payload == HELLO {
        EventKind::Hello
    } else if payload == LEAVE {
        EventKind::Leave
    } else {
        EventKind::Chat(payload.to_string())
    };

    DecodedEvent {
        alias: alias.to_string(),
        kind,
    }
}

/// Decodes a datagram, replacing invalid UTF-8 instead of failing.
pub fn decode_bytes(raw: &[u8]) -> DecodedEvent {
    decode(&String::from_utf8_lossy(raw))
}

fn split_frame(text: &str) -> (&str, &str) {
    if let Some(rest) = text.strip_prefix('[') {
        if let Some(end) = rest.find("] ") {
            return (&rest[..end], &rest[end + 2..]);
        }
    }
    (UNKNOWN_ALIAS, text)
}

fn parse_user_list(raw: &str) -> Vec<String> {
    raw.trim()
        .split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads one newline-terminated line, lossily decoded and stripped of its
/// terminator. Returns `None` at end of stream.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let bytes = reader.read_until(b'\n', &mut buf).await?;
    if bytes == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

/// Writes `frame` followed by a newline and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(frame.len() + 1);
    encoded.extend_from_slice(frame);
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
