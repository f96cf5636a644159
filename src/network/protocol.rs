//! Wire Protocol
//!
//! Fixed-layout, tagged-union binary frames exchanged between clients and the relay.
//!
//! ```text
//! frame = tag:i32 (big-endian) || fields...
//! ```
//!
//! Every variant has a fixed length known from its tag, so frames are never
//! length-prefixed. The tag table ([`MessageKind`]) and the per-variant field
//! layouts ([`MessageKind::layout`]) are the contract shared by both ends and
//! must not be reordered.

use std::fmt;

use bytes::{Buf, BufMut};
use thiserror::Error;
use uuid::Uuid;

/// Size of the frame tag in bytes.
pub const TAG_LEN: usize = 4;

/// Size of an encoded [`PeerId`] in bytes.
pub const PEER_ID_LEN: usize = 16;

// =============================================================================
// PEER ID
// =============================================================================

/// Opaque 16-byte peer identifier, assigned by the relay at handshake time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PeerId(pub [u8; PEER_ID_LEN]);

impl PeerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh random id for a newly accepted connection.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<Uuid> for PeerId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.into_bytes())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0).hyphenated())
    }
}

// =============================================================================
// TAG TABLE & LAYOUTS
// =============================================================================

/// Wire tag of each message variant. Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageKind {
    /// Client greeting, first frame on every connection.
    Hello = 0,
    /// Peer id assigned or joined.
    Welcome = 1,
    /// Request for the receiver's current state.
    GetState = 2,
    /// Directed kinematic snapshot.
    Sync = 3,
    /// Peer disconnected.
    Left = 4,
    /// Turning-right intent changed.
    TurningRight = 5,
    /// Turning-left intent changed.
    TurningLeft = 6,
    /// Walking-forward intent changed.
    WalkingForward = 7,
    /// Walking-backward intent changed.
    WalkingBackward = 8,
}

/// Primitive field types that may appear in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// 4 bytes, big-endian two's complement.
    I32,
    /// 4 bytes, big-endian IEEE-754.
    F32,
    /// 1 byte, 0 or 1.
    Bool,
    /// 16 raw bytes.
    PeerId,
}

impl FieldType {
    /// Encoded size in bytes.
    pub const fn size(self) -> usize {
        match self {
            FieldType::I32 | FieldType::F32 => 4,
            FieldType::Bool => 1,
            FieldType::PeerId => PEER_ID_LEN,
        }
    }
}

/// One field of a variant's body layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    /// Field name.
    pub name: &'static str,
    /// Field type.
    pub ty: FieldType,
    /// Byte offset within the body (after the tag).
    pub offset: usize,
}

const fn field(name: &'static str, ty: FieldType, offset: usize) -> FieldLayout {
    FieldLayout { name, ty, offset }
}

const HELLO_LAYOUT: &[FieldLayout] = &[];

const WELCOME_LAYOUT: &[FieldLayout] = &[field("to_id", FieldType::PeerId, 0)];

const FROM_ID_LAYOUT: &[FieldLayout] = &[field("from_id", FieldType::PeerId, 0)];

const SYNC_LAYOUT: &[FieldLayout] = &[
    field("from_id", FieldType::PeerId, 0),
    field("to_id", FieldType::PeerId, 16),
    field("position_x", FieldType::F32, 32),
    field("position_y", FieldType::F32, 36),
    field("position_z", FieldType::F32, 40),
    field("direction_x", FieldType::F32, 44),
    field("direction_y", FieldType::F32, 48),
    field("speed", FieldType::F32, 52),
    field("rotation_speed", FieldType::F32, 56),
    field("is_turning_right", FieldType::Bool, 60),
    field("is_turning_left", FieldType::Bool, 61),
    field("is_walking_forward", FieldType::Bool, 62),
    field("is_walking_backward", FieldType::Bool, 63),
];

const INTENT_LAYOUT: &[FieldLayout] = &[
    field("from_id", FieldType::PeerId, 0),
    field("state", FieldType::Bool, 16),
];

impl MessageKind {
    /// All variants in wire order. Index == tag.
    pub const ALL: [MessageKind; 9] = [
        MessageKind::Hello,
        MessageKind::Welcome,
        MessageKind::GetState,
        MessageKind::Sync,
        MessageKind::Left,
        MessageKind::TurningRight,
        MessageKind::TurningLeft,
        MessageKind::WalkingForward,
        MessageKind::WalkingBackward,
    ];

    /// Number of variants in the protocol.
    pub const COUNT: usize = Self::ALL.len();

    /// Wire tag.
    pub const fn tag(self) -> i32 {
        self as i32
    }

    /// Look up a variant by wire tag.
    pub fn from_tag(tag: i32) -> Option<Self> {
        usize::try_from(tag).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    /// Body layout: fields in wire order with their byte offsets.
    pub const fn layout(self) -> &'static [FieldLayout] {
        match self {
            MessageKind::Hello => HELLO_LAYOUT,
            MessageKind::Welcome => WELCOME_LAYOUT,
            MessageKind::GetState | MessageKind::Left => FROM_ID_LAYOUT,
            MessageKind::Sync => SYNC_LAYOUT,
            MessageKind::TurningRight
            | MessageKind::TurningLeft
            | MessageKind::WalkingForward
            | MessageKind::WalkingBackward => INTENT_LAYOUT,
        }
    }

    /// Body length in bytes (frame minus tag).
    pub fn body_len(self) -> usize {
        self.layout().iter().map(|f| f.ty.size()).sum()
    }

    /// Total frame length in bytes, tag included.
    pub fn frame_len(self) -> usize {
        TAG_LEN + self.body_len()
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Kinematic snapshot of one peer, sent from `from_id` to `to_id`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncState {
    /// Peer whose state this is.
    pub from_id: PeerId,
    /// Peer that asked for it.
    pub to_id: PeerId,
    /// Position (x, y, z).
    pub position: [f32; 3],
    /// Facing on the ground plane (x, z).
    pub direction: [f32; 2],
    /// Walking speed (units/second).
    pub speed: f32,
    /// Turning speed (radians/second).
    pub rotation_speed: f32,
    /// Turning right.
    pub is_turning_right: bool,
    /// Turning left.
    pub is_turning_left: bool,
    /// Walking forward.
    pub is_walking_forward: bool,
    /// Walking backward.
    pub is_walking_backward: bool,
}

/// A protocol message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    /// Client greeting.
    Hello,
    /// `to_id` was assigned (to its owner) or joined (to everyone else).
    Welcome {
        /// Assigned or joining peer.
        to_id: PeerId,
    },
    /// "Send me your current state."
    GetState {
        /// Requesting peer.
        from_id: PeerId,
    },
    /// Directed state snapshot.
    Sync(SyncState),
    /// Peer disconnected.
    Left {
        /// Departed peer.
        from_id: PeerId,
    },
    /// Turning-right intent changed.
    TurningRight {
        /// Peer whose intent changed.
        from_id: PeerId,
        /// New intent.
        state: bool,
    },
    /// Turning-left intent changed.
    TurningLeft {
        /// Peer whose intent changed.
        from_id: PeerId,
        /// New intent.
        state: bool,
    },
    /// Walking-forward intent changed.
    WalkingForward {
        /// Peer whose intent changed.
        from_id: PeerId,
        /// New intent.
        state: bool,
    },
    /// Walking-backward intent changed.
    WalkingBackward {
        /// Peer whose intent changed.
        from_id: PeerId,
        /// New intent.
        state: bool,
    },
}

/// Frame decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer than four bytes, so no tag.
    #[error("frame too short for a tag: {len} bytes")]
    TruncatedTag {
        /// Buffer length.
        len: usize,
    },

    /// Tag outside the variant table.
    #[error("unknown message tag {0}")]
    UnknownTag(i32),

    /// Body length does not match the variant's fixed length.
    #[error("{kind:?} body must be {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Variant implied by the tag.
        kind: MessageKind,
        /// Fixed body length of that variant.
        expected: usize,
        /// Bytes actually present after the tag.
        actual: usize,
    },
}

impl Message {
    /// Variant tag of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Hello => MessageKind::Hello,
            Message::Welcome { .. } => MessageKind::Welcome,
            Message::GetState { .. } => MessageKind::GetState,
            Message::Sync(_) => MessageKind::Sync,
            Message::Left { .. } => MessageKind::Left,
            Message::TurningRight { .. } => MessageKind::TurningRight,
            Message::TurningLeft { .. } => MessageKind::TurningLeft,
            Message::WalkingForward { .. } => MessageKind::WalkingForward,
            Message::WalkingBackward { .. } => MessageKind::WalkingBackward,
        }
    }

    /// Encode into a single frame.
    pub fn encode(&self) -> Vec<u8> {
        let kind = self.kind();
        let mut buf = Vec::with_capacity(kind.frame_len());
        buf.put_i32(kind.tag());

        match self {
            Message::Hello => {}
            Message::Welcome { to_id } => buf.put_slice(to_id.as_bytes()),
            Message::GetState { from_id } | Message::Left { from_id } => {
                buf.put_slice(from_id.as_bytes())
            }
            Message::Sync(sync) => {
                buf.put_slice(sync.from_id.as_bytes());
                buf.put_slice(sync.to_id.as_bytes());
                for v in sync.position {
                    buf.put_f32(v);
                }
                for v in sync.direction {
                    buf.put_f32(v);
                }
                buf.put_f32(sync.speed);
                buf.put_f32(sync.rotation_speed);
                buf.put_u8(sync.is_turning_right as u8);
                buf.put_u8(sync.is_turning_left as u8);
                buf.put_u8(sync.is_walking_forward as u8);
                buf.put_u8(sync.is_walking_backward as u8);
            }
            Message::TurningRight { from_id, state }
            | Message::TurningLeft { from_id, state }
            | Message::WalkingForward { from_id, state }
            | Message::WalkingBackward { from_id, state } => {
                buf.put_slice(from_id.as_bytes());
                buf.put_u8(*state as u8);
            }
        }

        debug_assert_eq!(buf.len(), kind.frame_len());
        buf
    }

    /// Decode exactly one frame. Extra or missing bytes are an error.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < TAG_LEN {
            return Err(DecodeError::TruncatedTag { len: frame.len() });
        }

        let mut buf = frame;
        let tag = buf.get_i32();
        let kind = MessageKind::from_tag(tag).ok_or(DecodeError::UnknownTag(tag))?;

        let expected = kind.body_len();
        if buf.remaining() != expected {
            return Err(DecodeError::LengthMismatch {
                kind,
                expected,
                actual: buf.remaining(),
            });
        }

        let msg = match kind {
            MessageKind::Hello => Message::Hello,
            MessageKind::Welcome => Message::Welcome {
                to_id: get_peer_id(&mut buf),
            },
            MessageKind::GetState => Message::GetState {
                from_id: get_peer_id(&mut buf),
            },
            MessageKind::Sync => Message::Sync(SyncState {
                from_id: get_peer_id(&mut buf),
                to_id: get_peer_id(&mut buf),
                position: [buf.get_f32(), buf.get_f32(), buf.get_f32()],
                direction: [buf.get_f32(), buf.get_f32()],
                speed: buf.get_f32(),
                rotation_speed: buf.get_f32(),
                is_turning_right: get_bool(&mut buf),
                is_turning_left: get_bool(&mut buf),
                is_walking_forward: get_bool(&mut buf),
                is_walking_backward: get_bool(&mut buf),
            }),
            MessageKind::Left => Message::Left {
                from_id: get_peer_id(&mut buf),
            },
            MessageKind::TurningRight => Message::TurningRight {
                from_id: get_peer_id(&mut buf),
                state: get_bool(&mut buf),
            },
            MessageKind::TurningLeft => Message::TurningLeft {
                from_id: get_peer_id(&mut buf),
                state: get_bool(&mut buf),
            },
            MessageKind::WalkingForward => Message::WalkingForward {
                from_id: get_peer_id(&mut buf),
                state: get_bool(&mut buf),
            },
            MessageKind::WalkingBackward => Message::WalkingBackward {
                from_id: get_peer_id(&mut buf),
                state: get_bool(&mut buf),
            },
        };

        Ok(msg)
    }
}

// Callers have already checked the body length against the layout.
fn get_peer_id(buf: &mut &[u8]) -> PeerId {
    let mut id = [0u8; PEER_ID_LEN];
    buf.copy_to_slice(&mut id);
    PeerId(id)
}

fn get_bool(buf: &mut &[u8]) -> bool {
    buf.get_u8() != 0
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const A: PeerId = PeerId::new([0xAA; 16]);
    const B: PeerId = PeerId::new([0xBB; 16]);

    fn sample_sync() -> SyncState {
        SyncState {
            from_id: A,
            to_id: B,
            position: [1.5, 0.0, -3.25],
            direction: [0.0, 1.0],
            speed: 10.0,
            rotation_speed: 1.0,
            is_turning_right: true,
            is_turning_left: false,
            is_walking_forward: true,
            is_walking_backward: false,
        }
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::Hello,
            Message::Welcome { to_id: A },
            Message::GetState { from_id: B },
            Message::Sync(sample_sync()),
            Message::Left { from_id: A },
            Message::TurningRight { from_id: A, state: true },
            Message::TurningLeft { from_id: B, state: false },
            Message::WalkingForward { from_id: A, state: true },
            Message::WalkingBackward { from_id: B, state: true },
        ]
    }

    #[test]
    fn test_tag_table_order() {
        for (i, kind) in MessageKind::ALL.iter().enumerate() {
            assert_eq!(kind.tag(), i as i32);
            assert_eq!(MessageKind::from_tag(i as i32), Some(*kind));
        }
        assert_eq!(MessageKind::COUNT, 9);
        assert_eq!(MessageKind::from_tag(9), None);
        assert_eq!(MessageKind::from_tag(-1), None);
    }

    #[test]
    fn test_frame_lengths() {
        assert_eq!(MessageKind::Hello.frame_len(), 4);
        assert_eq!(MessageKind::Welcome.frame_len(), 20);
        assert_eq!(MessageKind::GetState.frame_len(), 20);
        assert_eq!(MessageKind::Sync.frame_len(), 68);
        assert_eq!(MessageKind::Left.frame_len(), 20);
        assert_eq!(MessageKind::TurningRight.frame_len(), 21);
        assert_eq!(MessageKind::WalkingBackward.frame_len(), 21);
    }

    #[test]
    fn test_layout_offsets_are_contiguous() {
        for kind in MessageKind::ALL {
            let mut next = 0;
            for f in kind.layout() {
                assert_eq!(f.offset, next, "{kind:?}.{} misplaced", f.name);
                next += f.ty.size();
            }
            assert_eq!(next, kind.body_len());
        }
    }

    #[test]
    fn test_encode_matches_layout() {
        let frame = Message::Sync(sample_sync()).encode();
        let body = &frame[TAG_LEN..];
        let offset = |name: &str| {
            SYNC_LAYOUT
                .iter()
                .find(|f| f.name == name)
                .map(|f| f.offset)
                .unwrap()
        };

        assert_eq!(&frame[..TAG_LEN], &3i32.to_be_bytes());
        assert_eq!(&body[offset("to_id")..offset("to_id") + 16], B.as_bytes());
        assert_eq!(
            &body[offset("position_z")..offset("position_z") + 4],
            &(-3.25f32).to_be_bytes()
        );
        assert_eq!(body[offset("is_turning_right")], 1);
        assert_eq!(body[offset("is_turning_left")], 0);
        assert_eq!(body[offset("is_walking_forward")], 1);
    }

    #[test]
    fn test_encode_intent_bytes() {
        let frame = Message::WalkingForward { from_id: A, state: true }.encode();
        let mut expected = vec![0, 0, 0, 7];
        expected.extend_from_slice(&[0xAA; 16]);
        expected.push(1);
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_roundtrip_every_variant() {
        for msg in sample_messages() {
            let frame = msg.encode();
            assert_eq!(frame.len(), msg.kind().frame_len());
            assert_eq!(Message::decode(&frame).unwrap(), msg);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_tags() {
        assert_eq!(
            Message::decode(&9i32.to_be_bytes()),
            Err(DecodeError::UnknownTag(9))
        );
        assert_eq!(
            Message::decode(&(-1i32).to_be_bytes()),
            Err(DecodeError::UnknownTag(-1))
        );
    }

    #[test]
    fn test_decode_rejects_short_and_long_bodies() {
        for msg in sample_messages() {
            let frame = msg.encode();

            let mut long = frame.clone();
            long.push(0);
            assert!(matches!(
                Message::decode(&long),
                Err(DecodeError::LengthMismatch { .. })
            ));

            if frame.len() > TAG_LEN {
                let short = &frame[..frame.len() - 1];
                assert!(matches!(
                    Message::decode(short),
                    Err(DecodeError::LengthMismatch { .. })
                ));
            }
        }
    }

    #[test]
    fn test_decode_rejects_truncated_tag() {
        assert_eq!(Message::decode(&[]), Err(DecodeError::TruncatedTag { len: 0 }));
        assert_eq!(
            Message::decode(&[0, 0, 1]),
            Err(DecodeError::TruncatedTag { len: 3 })
        );
    }

    #[test]
    fn test_decode_nonzero_bool_is_true() {
        let mut frame = Message::TurningLeft { from_id: A, state: true }.encode();
        *frame.last_mut().unwrap() = 0x7f;
        assert_eq!(
            Message::decode(&frame).unwrap(),
            Message::TurningLeft { from_id: A, state: true }
        );
    }

    #[test]
    fn test_peer_id_display() {
        let id = PeerId::new([0x12; 16]);
        assert_eq!(id.short(), "12121212");
        assert_eq!(id.to_string(), "12121212-1212-1212-1212-121212121212");
        assert_ne!(PeerId::generate(), PeerId::generate());
    }

    fn peer_id() -> impl Strategy<Value = PeerId> {
        any::<[u8; 16]>().prop_map(PeerId)
    }

    // NaN never compares equal.
    fn finite() -> impl Strategy<Value = f32> {
        -1.0e6f32..1.0e6f32
    }

    fn sync_state() -> impl Strategy<Value = SyncState> {
        (
            (peer_id(), peer_id()),
            prop::array::uniform3(finite()),
            prop::array::uniform2(finite()),
            (finite(), finite()),
            any::<[bool; 4]>(),
        )
            .prop_map(|((from_id, to_id), position, direction, (speed, rotation_speed), flags)| {
                SyncState {
                    from_id,
                    to_id,
                    position,
                    direction,
                    speed,
                    rotation_speed,
                    is_turning_right: flags[0],
                    is_turning_left: flags[1],
                    is_walking_forward: flags[2],
                    is_walking_backward: flags[3],
                }
            })
    }

    fn message() -> impl Strategy<Value = Message> {
        prop_oneof![
            Just(Message::Hello),
            peer_id().prop_map(|to_id| Message::Welcome { to_id }),
            peer_id().prop_map(|from_id| Message::GetState { from_id }),
            sync_state().prop_map(Message::Sync),
            peer_id().prop_map(|from_id| Message::Left { from_id }),
            (peer_id(), any::<bool>())
                .prop_map(|(from_id, state)| Message::TurningRight { from_id, state }),
            (peer_id(), any::<bool>())
                .prop_map(|(from_id, state)| Message::TurningLeft { from_id, state }),
            (peer_id(), any::<bool>())
                .prop_map(|(from_id, state)| Message::WalkingForward { from_id, state }),
            (peer_id(), any::<bool>())
                .prop_map(|(from_id, state)| Message::WalkingBackward { from_id, state }),
        ]
    }

    proptest! {
        #[test]
        fn prop_roundtrip(msg in message()) {
            prop_assert_eq!(Message::decode(&msg.encode()), Ok(msg));
        }

        #[test]
        fn prop_rejects_wrong_length(msg in message(), extra in 1usize..8, cut in 1usize..4) {
            let frame = msg.encode();

            let mut long = frame.clone();
            long.extend(std::iter::repeat(0u8).take(extra));
            let long_is_mismatch = matches!(Message::decode(&long), Err(DecodeError::LengthMismatch { .. }));
            prop_assert!(long_is_mismatch);

            if frame.len() >= TAG_LEN + cut {
                let short_is_mismatch = matches!(
                    Message::decode(&frame[..frame.len() - cut]),
                    Err(DecodeError::LengthMismatch { .. })
                );
                prop_assert!(short_is_mismatch);
            }
        }

        #[test]
        fn prop_rejects_out_of_range_tag(tag in any::<i32>().prop_filter("in range", |t| *t < 0 || *t >= 9)) {
            prop_assert_eq!(Message::decode(&tag.to_be_bytes()), Err(DecodeError::UnknownTag(tag)));
        }
    }
}
