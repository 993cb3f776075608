//! STOMP 1.2 frame definitions and a streaming decoder.
//!
//! The message bus speaks STOMP over a WebSocket. Each WebSocket text message
//! normally carries one frame, but the decoder does not rely on that: frames may
//! be batched into one message or split across several.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Protocol versions offered in the CONNECT frame.
pub const ACCEPT_VERSION: &str = "1.2,1.1";

/// Upper bound on a single buffered frame.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Common header names
pub const HEADER_ACCEPT_VERSION: &str = "accept-version";
pub const HEADER_HOST: &str = "host";
pub const HEADER_HEART_BEAT: &str = "heart-beat";
pub const HEADER_DESTINATION: &str = "destination";
pub const HEADER_SUBSCRIPTION: &str = "subscription";
pub const HEADER_ID: &str = "id";
pub const HEADER_ACK: &str = "ack";
pub const HEADER_RECEIPT: &str = "receipt";
pub const HEADER_RECEIPT_ID: &str = "receipt-id";
pub const HEADER_MESSAGE: &str = "message";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_CONTENT_LENGTH: &str = "content-length";

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Errors raised while decoding frames.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("malformed header line `{0}`")]
    MalformedHeader(String),
    #[error("invalid escape sequence in `{0}`")]
    InvalidEscape(String),
    #[error("invalid content-length `{0}`")]
    InvalidContentLength(String),
    #[error("frame body is not terminated by NUL")]
    MissingTerminator,
    #[error("frame body is not valid UTF-8")]
    InvalidUtf8,
    #[error("frame exceeds {} bytes", MAX_FRAME_SIZE)]
    TooLarge,
    #[error("invalid heart-beat header `{0}`")]
    InvalidHeartBeat(String),
}

/// STOMP frame commands (client and server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameCommand {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl FrameCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameCommand::Connect => "CONNECT",
            FrameCommand::Stomp => "STOMP",
            FrameCommand::Connected => "CONNECTED",
            FrameCommand::Send => "SEND",
            FrameCommand::Subscribe => "SUBSCRIBE",
            FrameCommand::Unsubscribe => "UNSUBSCRIBE",
            FrameCommand::Ack => "ACK",
            FrameCommand::Nack => "NACK",
            FrameCommand::Begin => "BEGIN",
            FrameCommand::Commit => "COMMIT",
            FrameCommand::Abort => "ABORT",
            FrameCommand::Disconnect => "DISCONNECT",
            FrameCommand::Message => "MESSAGE",
            FrameCommand::Receipt => "RECEIPT",
            FrameCommand::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED frames carry raw header values.
    fn escapes_headers(&self) -> bool {
        !matches!(
            self,
            FrameCommand::Connect | FrameCommand::Stomp | FrameCommand::Connected
        )
    }
}

impl fmt::Display for FrameCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameCommand {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => FrameCommand::Connect,
            "STOMP" => FrameCommand::Stomp,
            "CONNECTED" => FrameCommand::Connected,
            "SEND" => FrameCommand::Send,
            "SUBSCRIBE" => FrameCommand::Subscribe,
            "UNSUBSCRIBE" => FrameCommand::Unsubscribe,
            "ACK" => FrameCommand::Ack,
            "NACK" => FrameCommand::Nack,
            "BEGIN" => FrameCommand::Begin,
            "COMMIT" => FrameCommand::Commit,
            "ABORT" => FrameCommand::Abort,
            "DISCONNECT" => FrameCommand::Disconnect,
            "MESSAGE" => FrameCommand::Message,
            "RECEIPT" => FrameCommand::Receipt,
            "ERROR" => FrameCommand::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: FrameCommand,
    /// Headers in wire order. Repeated names are allowed; the first one wins.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: FrameCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header value (first occurrence)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to wire format, NUL-terminated.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get(HEADER_CONTENT_LENGTH).is_none() {
            out.push_str(HEADER_CONTENT_LENGTH);
            out.push(':');
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode exactly one frame from `text`. Trailing heart-beat EOLs are ignored.
    pub fn decode(text: &str) -> Result<Frame, FrameError> {
        let mut decoder = FrameDecoder::default();
        decoder.push(text)?;
        loop {
            match decoder.next_frame()? {
                Some(Incoming::Frame(frame)) => return Ok(frame),
                Some(Incoming::Heartbeat) => continue,
                None => return Err(FrameError::MissingTerminator),
            }
        }
    }
}

/// Something read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Heartbeat,
    Frame(Frame),
}

/// Incremental frame decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: String,
}

impl FrameDecoder {
    /// Feed received text into the decoder
    pub fn push(&mut self, chunk: &str) -> Result<(), FrameError> {
        if self.buf.len() + chunk.len() > MAX_FRAME_SIZE {
            self.buf.clear();
            return Err(FrameError::TooLarge);
        }
        self.buf.push_str(chunk);
        Ok(())
    }

    /// Number of buffered bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete frame or heart-beat, if any.
    pub fn next_frame(&mut self) -> Result<Option<Incoming>, FrameError> {
        if self.buf.starts_with('\n') {
            self.buf.drain(..1);
            return Ok(Some(Incoming::Heartbeat));
        }
        if self.buf.starts_with("\r\n") {
            self.buf.drain(..2);
            return Ok(Some(Incoming::Heartbeat));
        }
        if self.buf.is_empty() {
            return Ok(None);
        }

        let bytes = self.buf.as_bytes();
        let mut pos = 0;
        let mut lines: Vec<&str> = Vec::new();
        loop {
            let Some(nl) = bytes[pos..].iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let line = &self.buf[pos..pos + nl];
            let line = line.strip_suffix('\r').unwrap_or(line);
            pos += nl + 1;
            if line.is_empty() {
                break;
            }
            lines.push(line);
        }

        let Some((command_line, header_lines)) = lines.split_first() else {
            return Ok(None);
        };
        let command: FrameCommand = command_line.parse()?;
        let escape = command.escapes_headers();

        let mut headers = Vec::with_capacity(header_lines.len());
        for line in header_lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(FrameError::MalformedHeader(line.to_string()));
            };
            if escape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == HEADER_CONTENT_LENGTH)
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        let (body_end, frame_end) = match content_length {
            Some(len) => {
                if len > MAX_FRAME_SIZE {
                    self.buf.clear();
                    return Err(FrameError::TooLarge);
                }
                let body_end = pos + len;
                if bytes.len() <= body_end {
                    return Ok(None);
                }
                if bytes[body_end] != 0 {
                    return Err(FrameError::MissingTerminator);
                }
                (body_end, body_end + 1)
            }
            None => {
                let Some(nul) = bytes[pos..].iter().position(|&b| b == 0) else {
                    return Ok(None);
                };
                (pos + nul, pos + nul + 1)
            }
        };

        let body = std::str::from_utf8(&bytes[pos..body_end])
            .map_err(|_| FrameError::InvalidUtf8)?
            .to_string();

        self.buf.drain(..frame_end);

        Ok(Some(Incoming::Frame(Frame {
            command,
            headers,
            body,
        })))
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

/// Heart-beat settings in milliseconds, as carried by the `heart-beat` header.
///
/// `send_ms` is the smallest interval at which this side can send heart-beats,
/// `expect_ms` the interval at which it wants to receive them. Zero disables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartBeat {
    pub send_ms: u64,
    pub expect_ms: u64,
}

impl HeartBeat {
    pub const DISABLED: HeartBeat = HeartBeat {
        send_ms: 0,
        expect_ms: 0,
    };

    pub fn new(send_ms: u64, expect_ms: u64) -> Self {
        Self { send_ms, expect_ms }
    }

    pub fn parse(value: &str) -> Result<Self, FrameError> {
        let invalid = || FrameError::InvalidHeartBeat(value.to_string());
        let (send, expect) = value.split_once(',').ok_or_else(invalid)?;
        Ok(Self {
            send_ms: send.trim().parse().map_err(|_| invalid())?,
            expect_ms: expect.trim().parse().map_err(|_| invalid())?,
        })
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.send_ms, self.expect_ms)
    }

    /// Combine the client's settings with the broker's CONNECTED header.
    pub fn negotiate(client: HeartBeat, server: HeartBeat) -> NegotiatedHeartBeat {
        let send_every = if client.send_ms == 0 || server.expect_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(client.send_ms.max(server.expect_ms)))
        };
        let expect_within = if client.expect_ms == 0 || server.send_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(client.expect_ms.max(server.send_ms)))
        };
        NegotiatedHeartBeat {
            send_every,
            expect_within,
        }
    }
}

impl Default for HeartBeat {
    fn default() -> Self {
        Self::new(10_000, 10_000)
    }
}

/// Heart-beat intervals agreed for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiatedHeartBeat {
    pub send_every: Option<Duration>,
    pub expect_within: Option<Duration>,
}

/// Build the CONNECT frame opening a session.
pub fn connect_frame(host: &str, heart_beat: HeartBeat, extra: &[(String, String)]) -> Frame {
    let mut frame = Frame::new(FrameCommand::Connect)
        .header(HEADER_ACCEPT_VERSION, ACCEPT_VERSION)
        .header(HEADER_HOST, host)
        .header(HEADER_HEART_BEAT, heart_beat.header_value());
    for (name, value) in extra {
        frame = frame.header(name.clone(), value.clone());
    }
    frame
}

pub fn subscribe_frame(id: &str, destination: &str) -> Frame {
    Frame::new(FrameCommand::Subscribe)
        .header(HEADER_ID, id)
        .header(HEADER_DESTINATION, destination)
        .header(HEADER_ACK, "auto")
}

pub fn unsubscribe_frame(id: &str) -> Frame {
    Frame::new(FrameCommand::Unsubscribe).header(HEADER_ID, id)
}

pub fn send_frame(destination: &str, json_body: String, extra: &[(String, String)]) -> Frame {
    let mut frame = Frame::new(FrameCommand::Send)
        .header(HEADER_DESTINATION, destination)
        .header(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON);
    for (name, value) in extra {
        frame = frame.header(name.clone(), value.clone());
    }
    frame.body(json_body)
}

pub fn disconnect_frame(receipt: &str) -> Frame {
    Frame::new(FrameCommand::Disconnect).header(HEADER_RECEIPT, receipt)
}

/// Best human-readable description of a broker ERROR frame.
pub fn error_summary(frame: &Frame) -> String {
    match (frame.get(HEADER_MESSAGE), frame.body.trim()) {
        (Some(message), "") => message.to_string(),
        (Some(message), body) => format!("{message}: {body}"),
        (None, "") => "broker reported an error".to_string(),
        (None, body) => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_frame_wire_format() {
        let frame = send_frame("/app/y", r#"{"a":1}"#.to_string(), &[]);
        assert_eq!(
            frame.encode(),
            "SEND\ndestination:/app/y\ncontent-type:application/json\ncontent-length:7\n\n{\"a\":1}\0"
        );
    }

    #[test]
    fn decodes_message_with_escaped_headers() {
        let raw = "MESSAGE\nsubscription:sub-0\ndestination:/topic/a\\cb\nmessage-id:7\n\n{\"foo\":1}\0";
        let frame = Frame::decode(raw).unwrap();
        assert_eq!(frame.command, FrameCommand::Message);
        assert_eq!(frame.get("destination"), Some("/topic/a:b"));
        assert_eq!(frame.body, "{\"foo\":1}");
    }

    #[test]
    fn connected_headers_are_not_unescaped() {
        let frame = Frame::decode("CONNECTED\nversion:1.2\nserver:a\\b\n\n\0").unwrap();
        assert_eq!(frame.get("server"), Some("a\\b"));
    }

    #[test]
    fn escaping_survives_encode_and_decode() {
        let original = Frame::new(FrameCommand::Send)
            .header("destination", "/topic/x")
            .header("note", "line1\nkey:value\\end");
        let decoded = Frame::decode(&original.encode()).unwrap();
        assert_eq!(decoded.get("note"), Some("line1\nkey:value\\end"));
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let raw = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frame = Frame::decode(raw).unwrap();
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn decoder_handles_split_and_batched_frames() {
        let mut decoder = FrameDecoder::default();
        decoder.push("MESSAGE\ndestination:/topic/x\n\n{\"n\"").unwrap();
        assert_eq!(decoder.next_frame().unwrap(), None);

        decoder.push(":1}\0\nRECEIPT\nreceipt-id:r1\n\n\0").unwrap();
        let first = decoder.next_frame().unwrap();
        assert!(matches!(first, Some(Incoming::Frame(ref f)) if f.body == "{\"n\":1}"));
        assert_eq!(decoder.next_frame().unwrap(), Some(Incoming::Heartbeat));
        let second = decoder.next_frame().unwrap();
        assert!(
            matches!(second, Some(Incoming::Frame(ref f)) if f.command == FrameCommand::Receipt)
        );
        assert_eq!(decoder.next_frame().unwrap(), None);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let frame = Frame::decode("MESSAGE\r\ndestination:/topic/x\r\n\r\nhi\0").unwrap();
        assert_eq!(frame.get("destination"), Some("/topic/x"));
        assert_eq!(frame.body, "hi");
    }

    #[test]
    fn rejects_unknown_command_and_bad_escape() {
        assert_eq!(
            Frame::decode("HELLO\n\n\0"),
            Err(FrameError::UnknownCommand("HELLO".into()))
        );
        assert!(matches!(
            Frame::decode("MESSAGE\nbad:\\t\n\n\0"),
            Err(FrameError::InvalidEscape(_))
        ));
    }

    #[test]
    fn oversized_input_is_rejected() {
        let mut decoder = FrameDecoder::default();
        let chunk = "x".repeat(MAX_FRAME_SIZE + 1);
        assert_eq!(decoder.push(&chunk), Err(FrameError::TooLarge));
    }

    #[test]
    fn huge_content_length_is_rejected() {
        assert_eq!(
            Frame::decode("MESSAGE\ncontent-length:18446744073709551615\n\nx\0"),
            Err(FrameError::TooLarge)
        );

        let mut decoder = FrameDecoder::default();
        let declared = format!("MESSAGE\ncontent-length:{}\n\n", MAX_FRAME_SIZE + 1);
        decoder.push(&declared).unwrap();
        assert_eq!(decoder.next_frame(), Err(FrameError::TooLarge));
        // The bad frame is discarded, so the decoder can be reused.
        decoder.push("MESSAGE\ncontent-length:2\n\nok\0").unwrap();
        assert!(matches!(decoder.next_frame(), Ok(Some(Incoming::Frame(f))) if f.body == "ok"));
    }

    #[test]
    fn heart_beat_negotiation() {
        let client = HeartBeat::new(10_000, 10_000);
        let negotiated = HeartBeat::negotiate(client, HeartBeat::parse("0,25000").unwrap());
        assert_eq!(negotiated.send_every, Some(Duration::from_millis(25_000)));
        assert_eq!(negotiated.expect_within, None);

        let negotiated = HeartBeat::negotiate(client, HeartBeat::new(5_000, 0));
        assert_eq!(negotiated.send_every, None);
        assert_eq!(negotiated.expect_within, Some(Duration::from_millis(10_000)));

        assert!(HeartBeat::parse("nope").is_err());
    }

    #[test]
    fn error_summary_prefers_message_header() {
        let frame = Frame::new(FrameCommand::Error)
            .header("message", "Access denied")
            .body("token expired");
        assert_eq!(error_summary(&frame), "Access denied: token expired");
        assert_eq!(
            error_summary(&Frame::new(FrameCommand::Error)),
            "broker reported an error"
        );
    }
}
