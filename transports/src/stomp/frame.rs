//! STOMP 1.2 frame codec
//!
//! A frame is `COMMAND\n(header:value\n)*\n<body>\0`. Header values are
//! escaped (`\\`, `\n`, `\r`, `\c`) on every command except CONNECT and
//! CONNECTED. Bodies carry a `content-length` header when they are sent by
//! us; inbound frames without one are read up to the first NUL. Bare EOLs
//! between frames are heart-beats and are skipped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest frame the decoder will buffer
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// STOMP command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client handshake
    Connect,
    /// Client handshake (1.2 alias)
    Stomp,
    /// Server handshake reply
    Connected,
    /// Publish to a destination
    Send,
    /// Start receiving from a destination
    Subscribe,
    /// Stop receiving
    Unsubscribe,
    /// Positive acknowledgment
    Ack,
    /// Negative acknowledgment
    Nack,
    /// Graceful close
    Disconnect,
    /// Server delivery
    Message,
    /// Server receipt
    Receipt,
    /// Server error
    Error,
}

impl Command {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        })
    }

    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame decoding failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Unknown command line
    #[error("unknown STOMP command: {0}")]
    UnknownCommand(String),

    /// Header line without a colon, or with a bad escape
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Command or headers are not UTF-8
    #[error("frame head is not valid UTF-8")]
    InvalidUtf8,

    /// `content-length` is not a number
    #[error("invalid content-length: {0}")]
    BadContentLength(String),

    /// Body of declared length is not followed by NUL
    #[error("frame body not terminated by NUL")]
    MissingNul,

    /// Frame exceeds [`MAX_FRAME_SIZE`]
    #[error("frame larger than {MAX_FRAME_SIZE} bytes")]
    TooLarge,
}

/// A single STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command
    pub command: Command,
    /// Headers in wire order; repeated names keep the first value
    pub headers: Vec<(String, String)>,
    /// Body
    pub body: Bytes,
}

impl Frame {
    /// Create a frame with no headers and an empty body
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body (a `content-length` header is added on encode)
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encode onto `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        let escape = self.command.escapes_headers();
        dst.put_slice(self.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in &self.headers {
            put_header_part(dst, name, escape);
            dst.put_u8(b':');
            put_header_part(dst, value, escape);
            dst.put_u8(b'\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            dst.put_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.put_slice(&self.body);
        dst.put_u8(0);
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64 + self.body.len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

fn put_header_part(dst: &mut BytesMut, s: &str, escape: bool) {
    if !escape {
        dst.put_slice(s.as_bytes());
        return;
    }
    for b in s.bytes() {
        match b {
            b'\\' => dst.put_slice(b"\\\\"),
            b'\n' => dst.put_slice(b"\\n"),
            b'\r' => dst.put_slice(b"\\r"),
            b':' => dst.put_slice(b"\\c"),
            _ => dst.put_u8(b),
        }
    }
}

fn unescape(s: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::MalformedHeader(s.to_string())),
        }
    }
    Ok(out)
}

/// Decode one frame from the front of `src`
///
/// Returns `Ok(None)` when `src` does not yet hold a complete frame; the
/// buffer is left untouched apart from skipped heart-beats.
pub fn decode(src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
    // Heart-beats
    while let Some(&b) = src.first() {
        if b == b'\n' {
            src.advance(1);
        } else if b == b'\r' && src.get(1) == Some(&b'\n') {
            src.advance(2);
        } else {
            break;
        }
    }
    if src.is_empty() {
        return Ok(None);
    }

    let Some(head_end) = find_head_end(src) else {
        if src.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge);
        }
        return Ok(None);
    };

    let head = std::str::from_utf8(&src[..head_end.start]).map_err(|_| FrameError::InvalidUtf8)?;
    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let command_line = lines.next().unwrap_or_default();
    let command = Command::parse(command_line)
        .ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;

    let escape = command.escapes_headers();
    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if escape {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::BadContentLength(v.clone()))
        })
        .transpose()?;

    let body_start = head_end.end;
    let (body_len, frame_len) = match content_length {
        Some(len) => {
            if len > MAX_FRAME_SIZE {
                return Err(FrameError::TooLarge);
            }
            if src.len() < body_start + len + 1 {
                return Ok(None);
            }
            if src[body_start + len] != 0 {
                return Err(FrameError::MissingNul);
            }
            (len, body_start + len + 1)
        }
        None => match src[body_start..].iter().position(|&b| b == 0) {
            Some(len) => (len, body_start + len + 1),
            None => {
                if src.len() > MAX_FRAME_SIZE {
                    return Err(FrameError::TooLarge);
                }
                return Ok(None);
            }
        },
    };

    let mut frame_bytes = src.split_to(frame_len);
    frame_bytes.advance(body_start);
    frame_bytes.truncate(body_len);

    Ok(Some(Frame {
        command,
        headers,
        body: frame_bytes.freeze(),
    }))
}

/// Range of the blank line separating headers from body
struct HeadEnd {
    start: usize,
    end: usize,
}

fn find_head_end(src: &[u8]) -> Option<HeadEnd> {
    let mut i = 0;
    while i < src.len() {
        if src[i] == b'\n' {
            match src.get(i + 1) {
                Some(b'\n') => return Some(HeadEnd { start: i, end: i + 2 }),
                Some(b'\r') if src.get(i + 2) == Some(&b'\n') => {
                    return Some(HeadEnd { start: i, end: i + 3 })
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(raw: &[u8]) -> Vec<Frame> {
        let mut buf = BytesMut::from(raw);
        let mut frames = Vec::new();
        while let Some(frame) = decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        assert!(buf.is_empty(), "leftover bytes: {:?}", buf);
        frames
    }

    #[test]
    fn test_encode_send_frame() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/queue/q.test")
            .body(Bytes::from_static(b"xx|0-0"));

        assert_eq!(
            frame.to_bytes().as_ref(),
            b"SEND\ndestination:/queue/q.test\ncontent-length:6\n\nxx|0-0\0"
        );
    }

    #[test]
    fn test_connect_headers_are_not_escaped() {
        let frame = Frame::new(Command::Connect).header("passcode", "a:b");
        let bytes = frame.to_bytes();
        assert!(bytes.windows(11).any(|w| w == b"passcode:a:"));
    }

    #[test]
    fn test_header_escaping() {
        let frame = Frame::new(Command::Message).header("note", "a:b\nc\\d");
        let encoded = frame.to_bytes();
        assert!(encoded.windows(14).any(|w| w == b"note:a\\cb\\nc\\\\"));

        let decoded = decode_all(&encoded);
        assert_eq!(decoded[0].get("note"), Some("a:b\nc\\d"));
    }

    #[test]
    fn test_decode_message_with_content_length() {
        let raw = b"MESSAGE\nsubscription:sub-0\nack:42\ncontent-length:5\n\nab\0de\0";
        let frames = decode_all(raw);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Message);
        assert_eq!(frames[0].get("ack"), Some("42"));
        assert_eq!(frames[0].body.as_ref(), b"ab\0de");
    }

    #[test]
    fn test_decode_without_content_length_and_heartbeats() {
        let raw = b"\n\r\nCONNECTED\r\nversion:1.2\r\n\r\n\0\nRECEIPT\nreceipt-id:1\n\n\0";
        let frames = decode_all(raw);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[0].get("version"), Some("1.2"));
        assert!(frames[0].body.is_empty());
        assert_eq!(frames[1].command, Command::Receipt);
    }

    #[test]
    fn test_decode_partial_frame() {
        let full = Frame::new(Command::Message)
            .header("ack", "1")
            .body(Bytes::from_static(b"hello"))
            .to_bytes();

        let mut buf = BytesMut::new();
        for chunk in full.chunks(4) {
            assert_eq!(decode(&mut buf).unwrap(), None);
            buf.extend_from_slice(chunk);
        }
        let frame = decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.body.as_ref(), b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_repeated_header_keeps_first() {
        let frames = decode_all(b"MESSAGE\nfoo:1\nfoo:2\n\n\0");
        assert_eq!(frames[0].get("foo"), Some("1"));
    }

    #[test]
    fn test_decode_errors() {
        let mut buf = BytesMut::from(&b"BOGUS\n\n\0"[..]);
        assert_eq!(
            decode(&mut buf),
            Err(FrameError::UnknownCommand("BOGUS".into()))
        );

        let mut buf = BytesMut::from(&b"MESSAGE\nnocolon\n\n\0"[..]);
        assert!(matches!(decode(&mut buf), Err(FrameError::MalformedHeader(_))));

        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:2\n\nabc\0"[..]);
        assert_eq!(decode(&mut buf), Err(FrameError::MissingNul));

        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:x\n\n\0"[..]);
        assert!(matches!(decode(&mut buf), Err(FrameError::BadContentLength(_))));
    }
}
