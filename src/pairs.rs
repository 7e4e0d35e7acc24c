//! Name-value pair blocks, the encoding PARAMS records use for the environment.

use super::error::{Error, Result};

use byteorder::{ByteOrder, NetworkEndian};
use bytes::BytesMut;

use std::collections::BTreeMap;

/// Decoded environment. Sorted so that encoding is reproducible.
pub type Params = BTreeMap<String, String>;

/// Safety bound on one encoded pair block. Not part of the base protocol.
pub const MAX_PAIR_BLOCK_SIZE: usize = 0xFFFF;

const MAX_PAIR_LENGTH: usize = 0x7FFF_FFFF;

/// Bytes needed to encode a length prefix.
pub fn len_size(len: usize) -> usize {
    if len < 0x80 {
        1
    } else {
        4
    }
}

fn write_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    if len < 0x80 {
        buf.extend_from_slice(&[len as u8]);
    } else if len <= MAX_PAIR_LENGTH {
        let mut bytes = [0u8; 4];
        NetworkEndian::write_u32(&mut bytes, len as u32 | 0x8000_0000);
        buf.extend_from_slice(&bytes);
    } else {
        error!("un-encodable name-value pair length: {:#x}", len);
        return Err(Error::PairTooLong { len });
    }
    Ok(())
}

fn read_len(buf: &[u8], offset: &mut usize) -> Result<usize> {
    let first_byte = *buf.get(*offset).ok_or(Error::TruncatedPairs { offset: *offset })?;
    if first_byte < 0x80 {
        *offset += 1;
        Ok(first_byte as usize)
    } else {
        let bytes = buf
            .get(*offset..*offset + 4)
            .ok_or(Error::TruncatedPairs { offset: *offset })?;
        *offset += 4;
        Ok(NetworkEndian::read_u32(bytes) as usize & !0x8000_0000)
    }
}

/// Encoded size of the whole pair block, without building it.
pub fn pair_block_size(params: &Params) -> usize {
    params
        .iter()
        .map(|(name, value)| {
            len_size(name.len()) + len_size(value.len()) + name.len() + value.len()
        })
        .sum()
}

pub fn encode_pair_block(params: &Params) -> Result<BytesMut> {
    let mut out = BytesMut::with_capacity(pair_block_size(params));
    for (name, value) in params {
        write_len(&mut out, name.len())?;
        write_len(&mut out, value.len())?;
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    Ok(out)
}

/// Decode a complete pair block. An empty block is an empty map; a duplicate name keeps the
/// last value.
///
/// Names and values are decoded lossily: bytes that are not valid UTF-8 become U+FFFD. The
/// result is meant for logging and lookups; forwarding always uses the raw records.
pub fn decode_pair_block(buf: &[u8]) -> Result<Params> {
    let mut params = Params::new();
    let mut offset = 0;
    while offset < buf.len() {
        let start = offset;
        let name_len = read_len(buf, &mut offset)?;
        let value_len = read_len(buf, &mut offset)?;
        let end = offset
            .checked_add(name_len)
            .and_then(|n| n.checked_add(value_len))
            .filter(|&end| end <= buf.len())
            .ok_or(Error::TruncatedPairs { offset: start })?;
        let name = String::from_utf8_lossy(&buf[offset..offset + name_len]).into_owned();
        let value = String::from_utf8_lossy(&buf[offset + name_len..end]).into_owned();
        trace!("param ({}, {})", name, value);
        params.insert(name, value);
        offset = end;
    }
    Ok(params)
}
