//! Load-test message payloads

use bytes::{BufMut, Bytes, BytesMut};

/// Byte used to pad message bodies
pub const FILLER_BYTE: u8 = b'x';

/// Separator between filler and tag
pub const TAG_SEPARATOR: u8 = b'|';

/// A message produced by the load generator
///
/// The body is `size` filler bytes followed by `|<producer>-<sequence>`.
/// The tag only aids tracing a message back to its producer; correctness
/// never depends on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: Bytes,
    producer_id: usize,
    sequence: u64,
}

impl Message {
    /// Build a filler message for the given producer and sequence number
    pub fn filler(size: usize, producer_id: usize, sequence: u64) -> Self {
        let tag = format!("{}-{}", producer_id, sequence);
        let mut body = BytesMut::with_capacity(size + 1 + tag.len());
        body.put_bytes(FILLER_BYTE, size);
        body.put_u8(TAG_SEPARATOR);
        body.put_slice(tag.as_bytes());

        Self {
            body: body.freeze(),
            producer_id,
            sequence,
        }
    }

    /// Full message body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the message, returning its body
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Producer that created the message
    pub fn producer_id(&self) -> usize {
        self.producer_id
    }

    /// Position in the producer's send order
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Body length in bytes
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty (never true for filler messages)
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Extract `(producer_id, sequence)` from a received body, if it carries a tag
pub fn parse_tag(body: &[u8]) -> Option<(usize, u64)> {
    let pos = body.iter().rposition(|b| *b == TAG_SEPARATOR)?;
    let tag = std::str::from_utf8(&body[pos + 1..]).ok()?;
    let (producer, sequence) = tag.split_once('-')?;
    Some((producer.parse().ok()?, sequence.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filler_layout() {
        let msg = Message::filler(4, 3, 17);
        assert_eq!(msg.body().as_ref(), b"xxxx|3-17");
        assert_eq!(msg.len(), 9);
        assert_eq!(msg.producer_id(), 3);
        assert_eq!(msg.sequence(), 17);
    }

    #[test]
    fn test_zero_size_still_tagged() {
        let msg = Message::filler(0, 0, 0);
        assert_eq!(msg.body().as_ref(), b"|0-0");
        assert!(!msg.is_empty());
    }

    #[test]
    fn test_parse_tag() {
        let msg = Message::filler(128, 12, 999);
        assert_eq!(parse_tag(msg.body()), Some((12, 999)));
    }

    #[test]
    fn test_parse_tag_rejects_untagged() {
        assert_eq!(parse_tag(b"hello"), None);
        assert_eq!(parse_tag(b"xx|nope"), None);
        assert_eq!(parse_tag(b"xx|1-"), None);
    }
}
