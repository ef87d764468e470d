// Frame codec: the bit-exact wire format shared by every backend.
//
// Every frame is a 2-byte header followed by the payload:
//
//   byte 0    frame kind: 0 = ROSTER, 1 = DATA
//   byte 1    address field, direction-dependent:
//               client -> server DATA: target id (0 = all participants)
//               server -> client DATA: origin id
//               ROSTER:                recipient's own (re)confirmed id
//   byte 2..  ROSTER: one byte per roster id, in server-chosen order
//             DATA:   raw application payload
//
// The total frame never exceeds 128 bytes, so payloads max out at 126.
// Encoding checks the bound before producing anything; decoding rejects
// frames shorter than the header rather than interpreting them.

use crate::error::ProtocolError;
use crate::packet::Packet;
use crate::types::PeerId;

/// Maximum total frame size, header included.
pub const MAX_FRAME_LEN: usize = Packet::CAPACITY;

/// Frame header size: kind byte plus address byte.
pub const HEADER_LEN: usize = 2;

/// Maximum application payload per frame.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

/// Wire value of the ROSTER frame kind.
pub const KIND_ROSTER: u8 = 0;

/// Wire value of the DATA frame kind.
pub const KIND_DATA: u8 = 1;

/// A decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Membership update: the recipient's own id plus the full roster.
    Roster { own_id: PeerId, ids: Vec<PeerId> },
    /// Application payload. The meaning of `address` depends on direction;
    /// see the module header.
    Data { address: PeerId, payload: Packet },
}

/// Encode a DATA frame. `address` is the target id on the client->server
/// leg and the origin id on the server->client leg.
pub fn encode_data(payload: &Packet, address: PeerId) -> Result<Vec<u8>, ProtocolError> {
    if HEADER_LEN + payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Overflow {
            len: HEADER_LEN + payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(KIND_DATA);
    frame.push(address.0);
    frame.extend_from_slice(payload.as_bytes());
    Ok(frame)
}

/// Encode a ROSTER frame for one recipient: byte 1 is that recipient's own
/// id, the payload is one byte per roster id.
pub fn encode_roster(recipient: PeerId, ids: &[PeerId]) -> Result<Vec<u8>, ProtocolError> {
    if HEADER_LEN + ids.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Overflow {
            len: HEADER_LEN + ids.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + ids.len());
    frame.push(KIND_ROSTER);
    frame.push(recipient.0);
    frame.extend(ids.iter().map(|id| id.0));
    Ok(frame)
}

/// Decode a received frame. Frames shorter than the header are a protocol
/// violation, as is an unknown kind byte.
pub fn decode(frame: &[u8]) -> Result<Frame, ProtocolError> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated { len: frame.len() });
    }
    if frame.len() > MAX_FRAME_LEN {
        // A conforming sender can never produce this; a broken peer can.
        return Err(ProtocolError::Overflow {
            len: frame.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let address = PeerId(frame[1]);
    match frame[0] {
        KIND_ROSTER => Ok(Frame::Roster {
            own_id: address,
            ids: frame[HEADER_LEN..].iter().map(|&b| PeerId(b)).collect(),
        }),
        KIND_DATA => {
            let payload = Packet::from_slice(&frame[HEADER_LEN..])?;
            Ok(Frame::Data { address, payload })
        }
        kind => Err(ProtocolError::UnknownKind(kind)),
    }
}
