//! On-disk byte formats.
//!
//! Two things live here: the MessagePack helpers every layer uses to turn
//! records into object payloads, and the frame format of the object log.
//!
//! # Object log frame
//!
//! ```text
//! +-------+--------+--------+-----------------+
//! | magic | length | crc32  | payload         |
//! | u32   | u32    | u32    | `length` bytes  |
//! +-------+--------+--------+-----------------+
//! ```
//!
//! All integers are little-endian. The CRC covers the payload only.

use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tessera_core::{Error, Result};

/// Frame magic ("TSOB")
pub const FRAME_MAGIC: u32 = 0x424F_5354;

/// Frame header size in bytes
pub const FRAME_HEADER_SIZE: usize = 12;

/// Serialize a record as MessagePack
pub fn to_msgpack<T: Serialize + ?Sized>(record: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(record)?)
}

/// Deserialize a MessagePack record
pub fn from_msgpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length
    pub length: u32,
    /// CRC32 of the payload
    pub crc: u32,
}

impl FrameHeader {
    /// Parse a header, rejecting a bad magic number
    pub fn parse(bytes: &[u8; FRAME_HEADER_SIZE], offset: u64) -> Result<Self> {
        let magic = LittleEndian::read_u32(&bytes[0..4]);
        if magic != FRAME_MAGIC {
            return Err(Error::Corrupted(format!(
                "bad frame magic {:#010x} at offset {}",
                magic, offset
            )));
        }
        Ok(FrameHeader {
            length: LittleEndian::read_u32(&bytes[4..8]),
            crc: LittleEndian::read_u32(&bytes[8..12]),
        })
    }

    /// Check a payload against this header
    pub fn verify(&self, payload: &[u8], offset: u64) -> Result<()> {
        let actual = crc32fast::hash(payload);
        if actual != self.crc {
            return Err(Error::Corrupted(format!(
                "checksum mismatch at offset {}: expected {:#010x}, got {:#010x}",
                offset, self.crc, actual
            )));
        }
        Ok(())
    }
}

/// Build a complete frame for `payload`
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(payload.len())
        .map_err(|_| Error::Storage(format!("object of {} bytes is too large", payload.len())))?;
    let mut frame = vec![0u8; FRAME_HEADER_SIZE + payload.len()];
    LittleEndian::write_u32(&mut frame[0..4], FRAME_MAGIC);
    LittleEndian::write_u32(&mut frame[4..8], length);
    LittleEndian::write_u32(&mut frame[8..12], crc32fast::hash(payload));
    frame[FRAME_HEADER_SIZE..].copy_from_slice(payload);
    Ok(frame)
}
