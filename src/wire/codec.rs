//! Box encoding and the resumable decoder.
//!
//! Wire layout: for each entry, a u16 big-endian key length (1..=255), the
//! key bytes, a u16 big-endian value length, the value bytes. A zero key
//! length terminates the box.
//!
//! [`BoxBuffer`] accumulates socket reads and extracts only complete boxes,
//! leaving partial bytes buffered for the next read. Duplicate keys within
//! one box are rejected as malformed.
//!
//! # Example
//!
//! ```
//! use peerwire::wire::{encode_box, BoxBuffer, WireBox};
//!
//! let bx = WireBox::request("source-ip", Some(1));
//! let bytes = encode_box(&bx).unwrap();
//!
//! let mut buffer = BoxBuffer::new();
//! let boxes = buffer.push(&bytes).unwrap();
//! assert_eq!(boxes.len(), 1);
//! assert_eq!(boxes[0], bx);
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::wirebox::{WireBox, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::error::{Result, WireError};

/// Default cap on the encoded size of a single box.
pub const DEFAULT_MAX_BOX_SIZE: usize = 1024 * 1024;

/// Encode a box into its wire representation.
pub fn encode_box(bx: &WireBox) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);
    for (key, value) in bx.iter() {
        if key.is_empty() || key.len() > MAX_KEY_SIZE {
            return Err(WireError::MalformedBox(format!(
                "key length {} out of range",
                key.len()
            )));
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(WireError::MalformedBox(format!(
                "value for {:?} exceeds {} bytes",
                key, MAX_VALUE_SIZE
            )));
        }
        buf.put_u16(key.len() as u16);
        buf.put_slice(key.as_bytes());
        buf.put_u16(value.len() as u16);
        buf.put_slice(value);
    }
    buf.put_u16(0);
    Ok(buf.freeze())
}

/// Buffer for accumulating incoming bytes and extracting complete boxes.
///
/// The decoder is resumable: a push that ends mid-box consumes nothing and
/// the partial bytes stay buffered until the box completes.
pub struct BoxBuffer {
    buffer: BytesMut,
    max_box_size: usize,
}

impl BoxBuffer {
    /// Create a box buffer with the default size cap.
    pub fn new() -> Self {
        Self::with_max_box_size(DEFAULT_MAX_BOX_SIZE)
    }

    /// Create a box buffer with a custom cap on one box's encoded size.
    pub fn with_max_box_size(max_box_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            max_box_size,
        }
    }

    /// Push data into the buffer and extract all complete boxes.
    ///
    /// Returns the complete boxes in arrival order; partial data is buffered
    /// for the next push.
    ///
    /// # Errors
    ///
    /// Returns `MalformedBox` on duplicate keys, oversized keys, or when the
    /// buffered bytes of one unfinished box exceed the size cap.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<WireBox>> {
        self.buffer.extend_from_slice(data);

        let mut boxes = Vec::new();
        while let Some(bx) = self.try_extract_one()? {
            boxes.push(bx);
        }
        Ok(boxes)
    }

    /// Number of buffered bytes not yet forming a complete box.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard buffered bytes. Used to resynchronize after a malformed box.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Try to extract a single box from the front of the buffer.
    ///
    /// Returns `Ok(None)` when more data is needed; in that case nothing is
    /// consumed and the parse restarts from the buffer head on the next push.
    fn try_extract_one(&mut self) -> Result<Option<WireBox>> {
        let buf = &self.buffer[..];
        let mut pos = 0usize;
        let mut bx = WireBox::new();

        loop {
            let Some(key_len) = read_u16(buf, pos) else {
                return self.need_more();
            };
            pos += 2;
            let key_len = key_len as usize;

            if key_len == 0 {
                self.buffer.advance(pos);
                return Ok(Some(bx));
            }
            if key_len > MAX_KEY_SIZE {
                return Err(WireError::MalformedBox(format!(
                    "key length {} exceeds {}",
                    key_len, MAX_KEY_SIZE
                )));
            }
            if buf.len() < pos + key_len {
                return self.need_more();
            }
            let key = std::str::from_utf8(&buf[pos..pos + key_len])
                .map_err(|_| WireError::MalformedBox("key is not UTF-8".into()))?
                .to_string();
            pos += key_len;

            let Some(value_len) = read_u16(buf, pos) else {
                return self.need_more();
            };
            pos += 2;
            let value_len = value_len as usize;
            if buf.len() < pos + value_len {
                return self.need_more();
            }
            let value = Bytes::copy_from_slice(&buf[pos..pos + value_len]);
            pos += value_len;

            if bx.contains(&key) {
                return Err(WireError::MalformedBox(format!(
                    "duplicate key: {:?}",
                    key
                )));
            }
            bx.push_decoded(key, value);
        }
    }

    fn need_more(&self) -> Result<Option<WireBox>> {
        if self.buffer.len() > self.max_box_size {
            return Err(WireError::MalformedBox(format!(
                "box exceeds {} bytes",
                self.max_box_size
            )));
        }
        Ok(None)
    }
}

impl Default for BoxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn read_u16(buf: &[u8], pos: usize) -> Option<u16> {
    if buf.len() < pos + 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[pos], buf[pos + 1]]))
}
