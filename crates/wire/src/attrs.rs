//! The "V33" attribute payload representation: a sequence of
//! self-delimiting attributes, each `(u32 length-including-tag) (bytes)
//! (1-byte tag)`. `length` counts the value bytes plus the trailing tag
//! byte, so a reader can skip an attribute it doesn't recognise without a
//! separate table of tag sizes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use shepherd_core::{Error, Result};
use std::io::{Read, Write};

/// One attribute's type tag. `Version` carries the protocol version
/// string in a `WELCOME` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// UTF-8 string value.
    Str = 0,
    /// Little-endian `u64` value.
    U64 = 1,
    /// A 32-byte footprint (`site_fp || rest_fp`).
    Footprint = 2,
    /// The protocol version string (`WELCOME`'s payload).
    Version = 3,
}

impl Tag {
    fn from_u8(b: u8) -> Result<Tag> {
        Ok(match b {
            0 => Tag::Str,
            1 => Tag::U64,
            2 => Tag::Footprint,
            3 => Tag::Version,
            other => return Err(Error::Protocol(format!("unknown attribute tag {other}"))),
        })
    }
}

/// One decoded attribute: its tag plus raw value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// The attribute's type tag.
    pub tag: Tag,
    /// Raw value bytes (interpretation depends on `tag`).
    pub value: Vec<u8>,
}

impl Attr {
    /// Build a UTF-8 string attribute.
    pub fn str(s: &str) -> Attr {
        Attr {
            tag: Tag::Str,
            value: s.as_bytes().to_vec(),
        }
    }

    /// Build a `u64` attribute.
    pub fn u64(v: u64) -> Attr {
        Attr {
            tag: Tag::U64,
            value: v.to_le_bytes().to_vec(),
        }
    }

    /// Build a footprint attribute.
    pub fn footprint(fp: &shepherd_core::Footprint) -> Attr {
        let mut value = Vec::with_capacity(32);
        value.extend_from_slice(&fp.site_fp);
        value.extend_from_slice(&fp.rest_fp);
        Attr {
            tag: Tag::Footprint,
            value,
        }
    }

    /// Build the `WELCOME` reply's protocol-version attribute.
    pub fn version(v: &str) -> Attr {
        Attr {
            tag: Tag::Version,
            value: v.as_bytes().to_vec(),
        }
    }

    /// Interpret the value as a UTF-8 string.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.value)
            .map_err(|e| Error::Protocol(format!("attribute is not valid UTF-8: {e}")))
    }

    /// Interpret the value as a little-endian `u64`.
    pub fn as_u64(&self) -> Result<u64> {
        let bytes: [u8; 8] = self
            .value
            .as_slice()
            .try_into()
            .map_err(|_| Error::Protocol("u64 attribute has wrong length".into()))?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Interpret the value as a 32-byte footprint.
    pub fn as_footprint(&self) -> Result<shepherd_core::Footprint> {
        if self.value.len() != 32 {
            return Err(Error::Protocol("footprint attribute has wrong length".into()));
        }
        let mut site_fp = [0u8; 16];
        let mut rest_fp = [0u8; 16];
        site_fp.copy_from_slice(&self.value[0..16]);
        rest_fp.copy_from_slice(&self.value[16..32]);
        Ok(shepherd_core::Footprint::new(site_fp, rest_fp))
    }
}

/// Encode a full attribute list (a message's ATTRS payload).
pub fn encode(attrs: &[Attr]) -> Vec<u8> {
    let mut buf = Vec::new();
    for attr in attrs {
        let length = (attr.value.len() + 1) as u32;
        buf.write_u32::<LittleEndian>(length).unwrap();
        buf.extend_from_slice(&attr.value);
        buf.push(attr.tag as u8);
    }
    buf
}

/// Decode a full attribute list from a message's ATTRS payload.
pub fn decode(mut payload: &[u8]) -> Result<Vec<Attr>> {
    let mut out = Vec::new();
    while !payload.is_empty() {
        let length = payload.read_u32::<LittleEndian>()? as usize;
        if length == 0 || length > payload.len() {
            return Err(Error::Protocol("truncated V33 attribute".into()));
        }
        let value_len = length - 1;
        let value = payload[..value_len].to_vec();
        let tag = Tag::from_u8(payload[value_len])?;
        payload = &payload[length..];
        out.push(Attr { tag, value });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_core::Footprint;

    #[test]
    fn string_attribute_roundtrips() {
        let attrs = vec![Attr::str("hello")];
        let decoded = decode(&encode(&attrs)).unwrap();
        assert_eq!(decoded[0].as_str().unwrap(), "hello");
    }

    #[test]
    fn u64_attribute_roundtrips() {
        let attrs = vec![Attr::u64(0xdead_beef_u64)];
        let decoded = decode(&encode(&attrs)).unwrap();
        assert_eq!(decoded[0].as_u64().unwrap(), 0xdead_beef);
    }

    #[test]
    fn multiple_attributes_roundtrip_in_order() {
        let fp = Footprint::new([1u8; 16], [2u8; 16]);
        let attrs = vec![Attr::str("x"), Attr::footprint(&fp), Attr::version("V330")];
        let decoded = decode(&encode(&attrs)).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].as_footprint().unwrap(), fp);
        assert_eq!(decoded[2].as_str().unwrap(), "V330");
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let attrs = vec![Attr::str("hello")];
        let mut bytes = encode(&attrs);
        bytes.pop();
        assert!(decode(&bytes).is_err());
    }
}
