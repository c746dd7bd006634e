use bytes::Bytes;

use crate::conversation::generate_conversation_id;
use crate::error::WireError;

/// Length in bytes of the fixed header: `conversation_id(16) || message_id(3)
/// || message_type(1)`.
pub const HEADER_LEN: usize = 20;

/// One-byte message-type tag carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Heartbeat or a legacy message with no structured payload.
    NotDefined = 0,
    /// `payload[0]` is a JSON-RPC 2.0 object or array.
    Json = 1,
    /// Opaque byte value outside the known range (legacy pub/sub encodings,
    /// reserved values, or anything the wire format does not constrain).
    Other(u8),
}

impl From<u8> for MessageType {
    fn from(v: u8) -> Self {
        match v {
            0 => MessageType::NotDefined,
            1 => MessageType::Json,
            other => MessageType::Other(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        match t {
            MessageType::NotDefined => 0,
            MessageType::Json => 1,
            MessageType::Other(v) => v,
        }
    }
}

/// The control envelope: version, receiver, sender, header, and zero or more
/// payload frames.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub version: u8,
    pub receiver: Bytes,
    pub sender: Bytes,
    pub conversation_id: [u8; 16],
    pub message_id: [u8; 3],
    pub message_type: MessageType,
    pub payload: Vec<Bytes>,
}

/// Equality is JSON-aware: two envelopes compare equal when `data_eq` does,
/// so `==` and `assert_eq!` already ignore payload frame 0's byte ordering.
impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.data_eq(other)
    }
}

impl Eq for Envelope {}

impl Envelope {
    /// Build a fresh envelope with a newly generated conversation id and
    /// zero message id, matching the common request-construction path.
    pub fn new(receiver: impl Into<Bytes>, sender: impl Into<Bytes>, message_type: MessageType) -> Self {
        Self {
            version: 0,
            receiver: receiver.into(),
            sender: sender.into(),
            conversation_id: generate_conversation_id(),
            message_id: [0; 3],
            message_type,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<Bytes>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_conversation_id(mut self, cid: [u8; 16]) -> Self {
        self.conversation_id = cid;
        self
    }

    /// Encode into the ordered frame list: version, receiver, sender,
    /// header, then payload frames. Fails if the sender is empty.
    pub fn encode(&self) -> Result<Vec<Bytes>, WireError> {
        if self.sender.is_empty() {
            return Err(WireError::EmptySender);
        }
        let mut frames = Vec::with_capacity(4 + self.payload.len());
        frames.push(Bytes::copy_from_slice(&[self.version]));
        frames.push(self.receiver.clone());
        frames.push(self.sender.clone());
        frames.push(Bytes::copy_from_slice(&header_build(
            self.conversation_id,
            self.message_id,
            self.message_type,
        )));
        frames.extend(self.payload.iter().cloned());
        Ok(frames)
    }

    /// Decode from an ordered frame list. Requires at least 4 frames; any
    /// frames beyond the header become the payload.
    pub fn decode(frames: &[Bytes]) -> Result<Self, WireError> {
        if frames.len() < 4 {
            return Err(WireError::TooFewFrames { got: frames.len() });
        }
        let version = frames[0].first().copied().unwrap_or(0);
        let receiver = frames[1].clone();
        let sender = frames[2].clone();
        let (conversation_id, message_id, message_type) = header_parse(&frames[3])?;
        let payload = frames[4..].to_vec();

        Ok(Self {
            version,
            receiver,
            sender,
            conversation_id,
            message_id,
            message_type,
            payload,
        })
    }

    /// Whether frame 0 of the payload deserializes as valid JSON.
    pub fn json_body(&self) -> Option<Result<serde_json::Value, serde_json::Error>> {
        self.payload.first().map(|f| serde_json::from_slice(f))
    }

    /// JSON-aware equality: frame 0 compares equal if it deserializes to
    /// the same JSON value, even when the raw bytes differ (e.g. key
    /// ordering); all other payload frames compare byte-for-byte.
    pub fn data_eq(&self, other: &Self) -> bool {
        if self.version != other.version
            || self.receiver != other.receiver
            || self.sender != other.sender
            || self.conversation_id != other.conversation_id
            || self.message_id != other.message_id
            || self.message_type != other.message_type
        {
            return false;
        }
        if self.payload.len() != other.payload.len() {
            return false;
        }
        if self.payload.is_empty() {
            return true;
        }
        let frame0_eq = match (self.json_body(), other.json_body()) {
            (Some(Ok(a)), Some(Ok(b))) => a == b,
            _ => self.payload[0] == other.payload[0],
        };
        frame0_eq && self.payload[1..] == other.payload[1..]
    }
}

/// Build the 20-byte header from its sub-fields.
pub fn header_build(conversation_id: [u8; 16], message_id: [u8; 3], message_type: MessageType) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..16].copy_from_slice(&conversation_id);
    header[16..19].copy_from_slice(&message_id);
    header[19] = message_type.into();
    header
}

/// Parse a 20-byte header back into its sub-fields.
pub fn header_parse(bytes: &[u8]) -> Result<([u8; 16], [u8; 3], MessageType), WireError> {
    if bytes.len() != HEADER_LEN {
        return Err(WireError::BadHeader {
            field: "header",
            expected: HEADER_LEN,
            got: bytes.len(),
        });
    }
    let mut conversation_id = [0u8; 16];
    conversation_id.copy_from_slice(&bytes[0..16]);
    let mut message_id = [0u8; 3];
    message_id.copy_from_slice(&bytes[16..19]);
    let message_type = MessageType::from(bytes[19]);
    Ok((conversation_id, message_id, message_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::new(Bytes::from_static(b"n1.B"), Bytes::from_static(b"n1.A"), MessageType::Json)
            .with_payload(vec![Bytes::from_static(br#"{"id":1}"#)])
    }

    #[test]
    fn round_trip_preserves_fields() {
        let msg = sample();
        let frames = msg.encode().unwrap();
        let decoded = Envelope::decode(&frames).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn encode_rejects_empty_sender() {
        let msg = Envelope::new(Bytes::from_static(b"n1.B"), Bytes::new(), MessageType::Json);
        assert_eq!(msg.encode().unwrap_err(), WireError::EmptySender);
    }

    #[test]
    fn decode_rejects_too_few_frames() {
        let frames = vec![Bytes::from_static(b"\0"), Bytes::from_static(b"r")];
        assert!(matches!(
            Envelope::decode(&frames),
            Err(WireError::TooFewFrames { got: 2 })
        ));
    }

    #[test]
    fn header_round_trip() {
        let cid = generate_conversation_id();
        let mid = [1, 2, 3];
        let header = header_build(cid, mid, MessageType::Json);
        let (pcid, pmid, ptype) = header_parse(&header).unwrap();
        assert_eq!(pcid, cid);
        assert_eq!(pmid, mid);
        assert_eq!(ptype, MessageType::Json);
    }

    #[test]
    fn header_parse_rejects_bad_length() {
        assert!(header_parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn empty_payload_distinct_from_single_empty_frame() {
        let a = Envelope::new(Bytes::from_static(b"n1.B"), Bytes::from_static(b"n1.A"), MessageType::NotDefined);
        let b = a.clone().with_payload(vec![Bytes::new()]);
        assert_ne!(a, b);
    }

    #[test]
    fn json_frame_equality_ignores_byte_ordering() {
        let a = Envelope::new(Bytes::from_static(b"n1.B"), Bytes::from_static(b"n1.A"), MessageType::Json)
            .with_payload(vec![Bytes::from_static(br#"{"a":1,"b":2}"#)]);
        let mut b = a.clone();
        b.payload = vec![Bytes::from_static(br#"{"b":2,"a":1}"#)];
        assert_eq!(a, b);
    }
}
