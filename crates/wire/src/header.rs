//! The fixed 16-byte message header: `leader`, `type` (packed `{mode:4,
//! payload:4, cmd:8}` in its low 16 bits), `id`, `data_len` — four
//! little-endian `u32`s, no padding.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use shepherd_core::{Error, Result};
use std::io::{Read, Write};

/// Every header must carry this constant or the message is rejected.
pub const LEADER: u32 = 0x2718_2818;

/// On-disk size of one header.
pub const HEADER_SIZE: usize = 16;

/// Default control-server TCP port.
pub const DEFAULT_PORT: u16 = 8187;

/// Which half of the protocol a message belongs to (the `type` field's
/// `mode` nibble).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Ordinary control request/reply exchange.
    Control,
    /// Inside a `SEND_MODE` session's streaming sub-protocol.
    SendMode,
}

impl Mode {
    fn to_nibble(self) -> u8 {
        match self {
            Mode::Control => 0,
            Mode::SendMode => 1,
        }
    }

    fn from_nibble(n: u8) -> Result<Mode> {
        match n {
            0 => Ok(Mode::Control),
            1 => Ok(Mode::SendMode),
            other => Err(Error::Protocol(format!("unknown mode nibble {other}"))),
        }
    }
}

/// The shape of a message's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// No payload; `data_len` is 0.
    None,
    /// Opaque bytes (a raw file slice, a streamed `DATA_BLOCK`).
    Raw,
    /// A V33 attribute blob (see [`crate::attrs`]).
    Attrs,
}

impl PayloadKind {
    fn to_nibble(self) -> u8 {
        match self {
            PayloadKind::None => 0,
            PayloadKind::Raw => 1,
            PayloadKind::Attrs => 2,
        }
    }

    fn from_nibble(n: u8) -> Result<PayloadKind> {
        match n {
            0 => Ok(PayloadKind::None),
            1 => Ok(PayloadKind::Raw),
            2 => Ok(PayloadKind::Attrs),
            other => Err(Error::Protocol(format!("unknown payload-kind nibble {other}"))),
        }
    }
}

/// The packed `{mode:4, payload:4, cmd:8}` `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageType {
    /// Connection sub-protocol.
    pub mode: Mode,
    /// Payload shape.
    pub payload: PayloadKind,
    /// The request or reply code, interpreted against whichever of
    /// [`crate::message::Request`]/[`crate::message::Reply`] applies to
    /// this message's direction.
    pub cmd: u8,
}

impl MessageType {
    /// Pack into the low 16 bits a header's 32-bit `type` field holds.
    pub fn to_bits(self) -> u32 {
        let mode = (self.mode.to_nibble() & 0x0f) as u32;
        let payload = (self.payload.to_nibble() & 0x0f) as u32;
        let cmd = self.cmd as u32;
        mode | (payload << 4) | (cmd << 8)
    }

    /// Unpack from a header's 32-bit `type` field.
    pub fn from_bits(bits: u32) -> Result<MessageType> {
        let mode = Mode::from_nibble((bits & 0x0f) as u8)?;
        let payload = PayloadKind::from_nibble(((bits >> 4) & 0x0f) as u8)?;
        let cmd = ((bits >> 8) & 0xff) as u8;
        Ok(MessageType { mode, payload, cmd })
    }
}

/// One fixed 16-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Must equal [`LEADER`].
    pub leader: u32,
    /// See [`MessageType`].
    pub msg_type: MessageType,
    /// Request/reply correlation id, echoed back verbatim.
    pub id: u32,
    /// Length in bytes of the payload following this header.
    pub data_len: u32,
}

impl Header {
    /// Build a header for `msg_type`/`id` with a payload of `data_len`
    /// bytes following it.
    pub fn new(msg_type: MessageType, id: u32, data_len: u32) -> Header {
        Header {
            leader: LEADER,
            msg_type,
            id,
            data_len,
        }
    }

    /// Write the fixed 16-byte encoding.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<LittleEndian>(self.leader)?;
        w.write_u32::<LittleEndian>(self.msg_type.to_bits())?;
        w.write_u32::<LittleEndian>(self.id)?;
        w.write_u32::<LittleEndian>(self.data_len)?;
        Ok(())
    }

    /// Read and validate a fixed 16-byte header.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Header> {
        let leader = r.read_u32::<LittleEndian>()?;
        if leader != LEADER {
            return Err(Error::Protocol(format!(
                "bad header leader {leader:#x}, expected {LEADER:#x}"
            )));
        }
        let type_bits = r.read_u32::<LittleEndian>()?;
        let msg_type = MessageType::from_bits(type_bits)?;
        let id = r.read_u32::<LittleEndian>()?;
        let data_len = r.read_u32::<LittleEndian>()?;
        Ok(Header {
            leader,
            msg_type,
            id,
            data_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_roundtrips_through_bits() {
        let mt = MessageType {
            mode: Mode::SendMode,
            payload: PayloadKind::Attrs,
            cmd: 17,
        };
        assert_eq!(MessageType::from_bits(mt.to_bits()).unwrap(), mt);
    }

    #[test]
    fn header_roundtrips_through_wire_bytes() {
        let header = Header::new(
            MessageType {
                mode: Mode::Control,
                payload: PayloadKind::Raw,
                cmd: 4,
            },
            42,
            128,
        );
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        let decoded = Header::read_from(&mut &buf[..]).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn bad_leader_is_rejected() {
        let buf = vec![0u8; HEADER_SIZE]; // leader 0, not LEADER
        assert!(Header::read_from(&mut &buf[..]).is_err());
    }
}
