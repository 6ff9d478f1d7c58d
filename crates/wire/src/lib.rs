//! The control-server wire protocol: the fixed 16-byte header, the V33
//! attribute payload codec, and the request/reply code tables.
//! `shepherd-server` builds its request dispatch on top of this; this crate
//! itself holds no I/O beyond `Read`/`Write` over an in-memory buffer or a
//! caller-supplied stream.

#![warn(missing_docs)]

pub mod attrs;
pub mod header;
pub mod message;

pub use attrs::{Attr, Tag};
pub use header::{Header, MessageType, Mode, PayloadKind, DEFAULT_PORT, HEADER_SIZE, LEADER};
pub use message::{Message, Payload, Reply, Request, PROTOCOL_VERSION};
