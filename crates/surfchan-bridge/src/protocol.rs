//! Wire protocol for bridge <-> game communication
//!
//! Frames are text: `<kind>:<payload>`. The kind is a small integer; the
//! payload is comma separated and its schema depends on the kind and the
//! direction. On the stream, frames are separated by [`FRAME_DELIMITER`]
//! (see [`crate::tcp`]). Only the first `:` separates the kind, so payloads
//! such as `127.0.0.1:27015` survive intact.

use surfchan_core::{DecodeError, Map, StepAction, SurfError, Telemetry};

/// Terminates a frame on the stream. Never appears inside a payload.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Separates the kind ordinal from the payload
pub const KIND_SEPARATOR: char = ':';

/// Frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Init = 1,
    Start = 2,
    Step = 3,
    Reset = 4,
}

impl FrameKind {
    pub const ALL: [FrameKind; 4] = [
        FrameKind::Init,
        FrameKind::Start,
        FrameKind::Step,
        FrameKind::Reset,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.ordinal() == ordinal)
    }
}

/// One decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: String,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self.kind, &self.payload)
    }
}

/// Encode a frame body (without the stream delimiter)
pub fn encode(kind: FrameKind, payload: &str) -> Vec<u8> {
    debug_assert!(
        !payload.as_bytes().contains(&FRAME_DELIMITER),
        "payload contains the frame delimiter"
    );
    format!("{}{}{}", kind.ordinal(), KIND_SEPARATOR, payload).into_bytes()
}

/// Decode a frame body. A trailing `\n` or `\r\n` delimiter is dropped;
/// the payload is otherwise kept byte for byte.
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DecodeError::MalformedFormat(format!("invalid UTF-8: {}", e)))?;
    let text = text.strip_suffix('\n').unwrap_or(text);
    let text = text.strip_suffix('\r').unwrap_or(text);

    if text.trim().is_empty() {
        return Err(DecodeError::Empty);
    }

    let (kind, payload) = text
        .split_once(KIND_SEPARATOR)
        .ok_or_else(|| DecodeError::MalformedFormat(text.to_string()))?;

    let kind = kind
        .trim()
        .parse::<u8>()
        .ok()
        .and_then(FrameKind::from_ordinal)
        .ok_or_else(|| DecodeError::UnknownKind(kind.to_string()))?;

    Ok(Frame::new(kind, payload))
}

/// Messages received from the game
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// Server plugin is up; the client should connect to `address`
    Init { address: String },
    /// Player spawned at the start position
    Start,
    /// Telemetry for the tick that answered our `Step`
    Step(Telemetry),
    /// Game acknowledged a reset
    Reset,
}

impl PeerMessage {
    pub fn kind(&self) -> FrameKind {
        match self {
            PeerMessage::Init { .. } => FrameKind::Init,
            PeerMessage::Start => FrameKind::Start,
            PeerMessage::Step(_) => FrameKind::Step,
            PeerMessage::Reset => FrameKind::Reset,
        }
    }
}

impl TryFrom<Frame> for PeerMessage {
    type Error = SurfError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        match frame.kind {
            FrameKind::Init => {
                let address = frame.payload.trim();
                if address.is_empty() {
                    return Err(SurfError::ProtocolError(
                        "Init frame without a connect address".into(),
                    ));
                }
                Ok(PeerMessage::Init {
                    address: address.to_string(),
                })
            }
            FrameKind::Start => Ok(PeerMessage::Start),
            FrameKind::Step => Ok(PeerMessage::Step(frame.payload.parse()?)),
            FrameKind::Reset => Ok(PeerMessage::Reset),
        }
    }
}

/// Messages sent to the game
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    /// Ask the server plugin for its connect address
    Init { tick_rate: u32 },
    /// Spawn the player at a position and facing angle
    Start { position: [f64; 3], angle: f64 },
    /// Apply an action for the next tick
    Step(StepAction),
    /// Reset the episode
    Reset,
}

impl BridgeMessage {
    pub fn start_for(map: &Map) -> Self {
        BridgeMessage::Start {
            position: map.start_pos(),
            angle: map.start_angle(),
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            BridgeMessage::Init { .. } => FrameKind::Init,
            BridgeMessage::Start { .. } => FrameKind::Start,
            BridgeMessage::Step(_) => FrameKind::Step,
            BridgeMessage::Reset => FrameKind::Reset,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let payload = match self {
            BridgeMessage::Init { tick_rate } => tick_rate.to_string(),
            BridgeMessage::Start { position, angle } => {
                format!("{},{},{},{}", position[0], position[1], position[2], angle)
            }
            BridgeMessage::Step(action) => action.to_payload(),
            BridgeMessage::Reset => String::new(),
        };
        Frame::new(self.kind(), payload)
    }
}
