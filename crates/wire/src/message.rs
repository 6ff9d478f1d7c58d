//! The control-protocol's request and reply code tables and the framed
//! [`Message`] that ties a [`Header`] to its payload.

use crate::attrs::{self, Attr};
use crate::header::{Header, MessageType, Mode, PayloadKind, LEADER};
use shepherd_core::{Error, Result};
use std::io::{Read, Write};

/// The protocol version string sent in every `WELCOME`.
pub const PROTOCOL_VERSION: &str = "V330";

/// Control-mode requests, plus the `SEND_MODE` sub-session's own
/// request set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Request {
    /// Liveness check.
    Ping = 0,
    /// Ask the master to enter `Cleanup` once idle.
    SetCleanup = 1,
    /// Ask the master to idle after its current cycle.
    SetIdle = 2,
    /// Ask the master to refuse peer borrow/mirror sessions.
    SetPrivate = 3,
    /// Ask the master to delete the `previous` state directory.
    SetDeleteOld = 4,
    /// Take the exclusive state lock.
    LockState = 5,
    /// Borrow `current` for reading, blocking until available.
    BorrowState = 6,
    /// Borrow `current` for reading, failing immediately if unavailable.
    BorrowStateQ = 7,
    /// Release a previously borrowed state.
    ReturnState = 8,
    /// Roll the working state back to the last checkpoint.
    RollbackState = 9,
    /// Release every lock this connection holds.
    UnlockStates = 10,
    /// Enter the streaming `SEND_MODE` sub-session.
    SendMode = 11,
    /// (`SEND_MODE`) Stream every bucket as `DATA_BLOCK*` + `DATA_END`.
    SendBuckets = 12,
    /// (`SEND_MODE`) Stream the raw `buckets` file.
    SendRawBuckets = 13,
    /// (`SEND_MODE`) Stream the raw `index` file.
    SendRawIndex = 14,
    /// (`SEND_MODE`) Stream the raw `sites` file.
    SendRawSites = 15,
    /// (`SEND_MODE`) Stream the raw `params` file.
    SendRawParams = 16,
    /// (`SEND_MODE`) Stream `urls` rows, optionally from a `u64` offset.
    SendUrls = 17,
    /// (`SEND_MODE`) Send one bucket looked up by footprint.
    SendBucket = 18,
    /// (`SEND_MODE`) Upload a feedback file for the `Feedback` stage.
    SendFeedback = 19,
}

impl Request {
    /// Decode a request code byte.
    pub fn from_u8(b: u8) -> Result<Request> {
        use Request::*;
        Ok(match b {
            0 => Ping,
            1 => SetCleanup,
            2 => SetIdle,
            3 => SetPrivate,
            4 => SetDeleteOld,
            5 => LockState,
            6 => BorrowState,
            7 => BorrowStateQ,
            8 => ReturnState,
            9 => RollbackState,
            10 => UnlockStates,
            11 => SendMode,
            12 => SendBuckets,
            13 => SendRawBuckets,
            14 => SendRawIndex,
            15 => SendRawSites,
            16 => SendRawParams,
            17 => SendUrls,
            18 => SendBucket,
            19 => SendFeedback,
            other => return Err(Error::Protocol(format!("unknown request code {other}"))),
        })
    }

    /// True for the `SEND_MODE` sub-session's own request set, which
    /// only makes sense once a connection has already entered
    /// `SEND_MODE`.
    pub fn is_send_mode_sub_request(&self) -> bool {
        matches!(
            self,
            Request::SendBuckets
                | Request::SendRawBuckets
                | Request::SendRawIndex
                | Request::SendRawSites
                | Request::SendRawParams
                | Request::SendUrls
                | Request::SendBucket
                | Request::SendFeedback
        )
    }
}

/// Reply codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    /// Request succeeded with no further data.
    Ok = 0,
    /// The request code wasn't recognised.
    UnknownReq = 1,
    /// The peer's IP address isn't in `Config::authorized_ips`.
    NotAuthorized = 2,
    /// Sent once, unsolicited, immediately after TCP connect.
    Welcome = 3,
    /// Reply to `PING`.
    Pong = 4,
    /// Acknowledges entry into `SEND_MODE`.
    SendMode = 5,
    /// A cleanup is pending; retry the request later.
    Defer = 6,
    /// One chunk of a streamed response.
    DataBlock = 7,
    /// Terminates a streamed response.
    DataEnd = 8,
    /// The requested operation is already running.
    InProgress = 9,
    /// `RETURN_STATE`/`ROLLBACK_STATE` with nothing borrowed.
    NoBorrowed = 10,
    /// `RETURN_STATE` for a state that failed validation on return.
    ReturningBad = 11,
    /// The named state directory doesn't exist.
    NoSuchState = 12,
}

impl Reply {
    /// Decode a reply code byte.
    pub fn from_u8(b: u8) -> Result<Reply> {
        // Matches are fully qualified (`Reply::Ok` rather than a glob
        // import) since `Reply::Ok` would otherwise collide with the
        // prelude's `Result::Ok` used by this function's own return.
        match b {
            0 => std::result::Result::Ok(Reply::Ok),
            1 => std::result::Result::Ok(Reply::UnknownReq),
            2 => std::result::Result::Ok(Reply::NotAuthorized),
            3 => std::result::Result::Ok(Reply::Welcome),
            4 => std::result::Result::Ok(Reply::Pong),
            5 => std::result::Result::Ok(Reply::SendMode),
            6 => std::result::Result::Ok(Reply::Defer),
            7 => std::result::Result::Ok(Reply::DataBlock),
            8 => std::result::Result::Ok(Reply::DataEnd),
            9 => std::result::Result::Ok(Reply::InProgress),
            10 => std::result::Result::Ok(Reply::NoBorrowed),
            11 => std::result::Result::Ok(Reply::ReturningBad),
            12 => std::result::Result::Ok(Reply::NoSuchState),
            other => Err(Error::Protocol(format!("unknown reply code {other}"))),
        }
    }
}

/// A fully framed message: header plus decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// No payload.
    None,
    /// Opaque bytes.
    Raw(Vec<u8>),
    /// Decoded V33 attributes.
    Attrs(Vec<Attr>),
}

/// One complete wire message (header + payload), ready to write or as
/// read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The header's `mode` nibble.
    pub mode: Mode,
    /// The request or reply code (direction-dependent; see
    /// [`Request::from_u8`]/[`Reply::from_u8`] at the call site).
    pub cmd: u8,
    /// Correlation id, echoed from request to reply.
    pub id: u32,
    /// The payload.
    pub payload: Payload,
}

impl Message {
    /// Build a no-payload message.
    pub fn empty(mode: Mode, cmd: u8, id: u32) -> Message {
        Message {
            mode,
            cmd,
            id,
            payload: Payload::None,
        }
    }

    /// Build a raw-bytes message.
    pub fn raw(mode: Mode, cmd: u8, id: u32, bytes: Vec<u8>) -> Message {
        Message {
            mode,
            cmd,
            id,
            payload: Payload::Raw(bytes),
        }
    }

    /// Build an attribute message.
    pub fn attrs(mode: Mode, cmd: u8, id: u32, attrs: Vec<Attr>) -> Message {
        Message {
            mode,
            cmd,
            id,
            payload: Payload::Attrs(attrs),
        }
    }

    /// The unsolicited `WELCOME` sent immediately after TCP connect.
    pub fn welcome(id: u32) -> Message {
        Message::attrs(
            Mode::Control,
            Reply::Welcome as u8,
            id,
            vec![Attr::version(PROTOCOL_VERSION)],
        )
    }

    /// The `PONG` reply to a `PING` with the same id.
    pub fn pong(id: u32) -> Message {
        Message::empty(Mode::Control, Reply::Pong as u8, id)
    }

    fn payload_kind(&self) -> PayloadKind {
        match &self.payload {
            Payload::None => PayloadKind::None,
            Payload::Raw(_) => PayloadKind::Raw,
            Payload::Attrs(_) => PayloadKind::Attrs,
        }
    }

    fn payload_bytes(&self) -> Vec<u8> {
        match &self.payload {
            Payload::None => Vec::new(),
            Payload::Raw(bytes) => bytes.clone(),
            Payload::Attrs(attrs) => attrs::encode(attrs),
        }
    }

    /// Write the framed `{header, payload}` to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let payload = self.payload_bytes();
        let header = Header::new(
            MessageType {
                mode: self.mode,
                payload: self.payload_kind(),
                cmd: self.cmd,
            },
            self.id,
            payload.len() as u32,
        );
        header.write_to(w)?;
        w.write_all(&payload)?;
        Ok(())
    }

    /// Read one framed `{header, payload}` from `r`.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Message> {
        let header = Header::read_from(r)?;
        if header.leader != LEADER {
            return Err(Error::Protocol("header failed leader validation".into()));
        }
        let mut buf = vec![0u8; header.data_len as usize];
        r.read_exact(&mut buf)?;
        let payload = match header.msg_type.payload {
            PayloadKind::None => Payload::None,
            PayloadKind::Raw => Payload::Raw(buf),
            PayloadKind::Attrs => Payload::Attrs(attrs::decode(&buf)?),
        };
        Ok(Message {
            mode: header.msg_type.mode,
            cmd: header.msg_type.cmd,
            id: header.id,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_roundtrips_and_carries_version() {
        let msg = Message::welcome(0);
        let mut buf = Vec::new();
        msg.write_to(&mut buf).unwrap();
        let decoded = Message::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded.cmd, Reply::Welcome as u8);
        match decoded.payload {
            Payload::Attrs(attrs) => assert_eq!(attrs[0].as_str().unwrap(), "V330"),
            _ => panic!("expected attrs payload"),
        }
    }

    #[test]
    fn ping_request_then_pong_reply_share_id() {
        let ping = Message::empty(Mode::Control, Request::Ping as u8, 7);
        let mut buf = Vec::new();
        ping.write_to(&mut buf).unwrap();
        let decoded = Message::read_from(&mut &buf[..]).unwrap();
        assert_eq!(Request::from_u8(decoded.cmd).unwrap(), Request::Ping);

        let pong = Message::pong(decoded.id);
        assert_eq!(pong.id, 7);
        assert_eq!(Reply::from_u8(pong.cmd).unwrap(), Reply::Pong);
    }

    #[test]
    fn raw_payload_roundtrips() {
        let msg = Message::raw(Mode::SendMode, Reply::DataBlock as u8, 1, vec![1, 2, 3, 4]);
        let mut buf = Vec::new();
        msg.write_to(&mut buf).unwrap();
        let decoded = Message::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded.payload, Payload::Raw(vec![1, 2, 3, 4]));
    }

    #[test]
    fn send_mode_sub_requests_are_tagged() {
        assert!(Request::SendBuckets.is_send_mode_sub_request());
        assert!(!Request::Ping.is_send_mode_sub_request());
    }
}
