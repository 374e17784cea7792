//! The benchmark message and its flat wire image
//!
//! A message is exactly [`FIELD_COUNT`] heap-allocated fields of one uniform
//! size chosen at startup. Field `i` is filled with [`field_marker`]`(i)` so
//! that the wire image is deterministic and receivers can verify layout.
//!
//! The wire format is the plain concatenation of the fields in order: no
//! length prefixes, no delimiters, no header. A full message on the wire is
//! always `FIELD_COUNT * field_size` bytes, and a byte stream produced by any
//! send strategy is an unbounded sequence of such images back to back.

use crate::error::{Error, Result};

/// Number of fields in every message.
pub const FIELD_COUNT: usize = 8;

/// Deterministic fill byte for field `index`.
///
/// Field 0 is filled with `b'A'`, field 1 with `b'B'`, and so on. Receivers
/// and tests use this to check that serialization preserved field order.
pub fn field_marker(index: usize) -> u8 {
    debug_assert!(index < FIELD_COUNT);
    b'A' + index as u8
}

/// A fixed-shape multi-field message owned by one connection worker.
///
/// The fields are allocated once at connection setup and released when the
/// message is dropped. For the zero-copy send path the field buffers are
/// handed to the kernel by address, so the message must outlive the last
/// in-flight submission; the send window in [`crate::completion`] gates that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    fields: Vec<Box<[u8]>>,
    field_size: usize,
}

impl Message {
    /// Allocates a message with `FIELD_COUNT` fields of `field_size` bytes,
    /// each pre-filled with its position marker.
    ///
    /// Allocation is fallible: on failure the fields allocated so far are
    /// released and `Error::Alloc` is returned, leaving no partial state.
    pub fn new(field_size: usize) -> Result<Self> {
        if field_size == 0 {
            return Err(Error::Config("field_size must be > 0".into()));
        }
        let mut fields = Vec::new();
        fields.try_reserve_exact(FIELD_COUNT)?;
        for i in 0..FIELD_COUNT {
            let mut field = Vec::new();
            field.try_reserve_exact(field_size)?;
            field.resize(field_size, field_marker(i));
            fields.push(field.into_boxed_slice());
        }
        Ok(Self { fields, field_size })
    }

    /// Bytes per field.
    pub fn field_size(&self) -> usize {
        self.field_size
    }

    /// Total size of the flat wire image.
    pub fn wire_len(&self) -> usize {
        FIELD_COUNT * self.field_size
    }

    /// Borrow one field buffer.
    pub fn field(&self, index: usize) -> &[u8] {
        &self.fields[index]
    }

    /// Iterate over the field buffers in wire order.
    pub fn fields(&self) -> impl Iterator<Item = &[u8]> {
        self.fields.iter().map(|f| &**f)
    }

    /// Concatenates the fields in order into `out`.
    ///
    /// The caller supplies at least [`Self::wire_len`] bytes; only that prefix
    /// is written.
    pub fn serialize_into(&self, out: &mut [u8]) {
        assert!(out.len() >= self.wire_len());
        let mut offset = 0;
        for field in &self.fields {
            out[offset..offset + self.field_size].copy_from_slice(field);
            offset += self.field_size;
        }
    }

    /// Allocates and fills a flat wire image of this message.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.try_reserve_exact(self.wire_len())?;
        out.resize(self.wire_len(), 0);
        self.serialize_into(&mut out);
        Ok(out)
    }

    /// Exact inverse of [`Self::serialize_into`]: splits `buf` into
    /// `FIELD_COUNT` equal slices and copies each into a fresh field.
    pub fn from_wire(buf: &[u8], field_size: usize) -> Result<Self> {
        if field_size == 0 {
            return Err(Error::Config("field_size must be > 0".into()));
        }
        if buf.len() != FIELD_COUNT * field_size {
            return Err(Error::Protocol(format!(
                "wire image of {} bytes does not hold {} fields of {} bytes",
                buf.len(),
                FIELD_COUNT,
                field_size
            )));
        }
        let mut fields = Vec::new();
        fields.try_reserve_exact(FIELD_COUNT)?;
        for chunk in buf.chunks_exact(field_size) {
            let mut field = Vec::new();
            field.try_reserve_exact(field_size)?;
            field.extend_from_slice(chunk);
            fields.push(field.into_boxed_slice());
        }
        Ok(Self { fields, field_size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_marker_filled() {
        let msg = Message::new(32).unwrap();
        for i in 0..FIELD_COUNT {
            assert!(msg.field(i).iter().all(|&b| b == field_marker(i)));
            assert_eq!(msg.field(i).len(), 32);
        }
    }

    #[test]
    fn serialize_writes_exactly_wire_len() {
        let msg = Message::new(16).unwrap();
        // Sentinel tail past wire_len must remain untouched
        let mut out = vec![0xEE; msg.wire_len() + 8];
        msg.serialize_into(&mut out);
        assert!(out[msg.wire_len()..].iter().all(|&b| b == 0xEE));
        assert!(out[..msg.wire_len()].iter().all(|&b| b != 0xEE));
    }

    #[test]
    fn wire_layout_64_byte_fields() {
        let msg = Message::new(64).unwrap();
        let wire = msg.to_wire().unwrap();
        assert_eq!(wire.len(), 512);
        for i in 0..FIELD_COUNT {
            assert_eq!(wire[i * 64], field_marker(i));
            assert_eq!(wire[i * 64 + 63], field_marker(i));
        }
        assert_eq!(wire[0], b'A');
        assert_eq!(wire[64], b'B');
    }

    #[test]
    fn round_trip_reproduces_fields() {
        for field_size in [1, 7, 64, 4096] {
            let msg = Message::new(field_size).unwrap();
            let wire = msg.to_wire().unwrap();
            let back = Message::from_wire(&wire, field_size).unwrap();
            assert_eq!(msg, back);
        }
    }

    #[test]
    fn zero_field_size_rejected() {
        assert!(matches!(Message::new(0), Err(Error::Config(_))));
    }

    #[test]
    fn from_wire_rejects_wrong_length() {
        let buf = vec![0u8; 100];
        assert!(matches!(
            Message::from_wire(&buf, 16),
            Err(Error::Protocol(_))
        ));
    }
}
