//! Little-endian primitive readers and writers shared by the codec
//!
//! Strings are `u32 length | utf-8 bytes | zero padding to a 4-byte boundary`; the padding is
//! not part of the length and is skipped without validation. Scalar arrays are
//! `u32 count | count × element`.

use crate::protocol::ProtocolError;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Bytes of padding that follow a string of `len` bytes
pub fn string_padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Cursor over one message payload
pub struct WireReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> WireReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(ProtocolError::from_read)
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.cursor
            .read_i32::<LittleEndian>()
            .map_err(ProtocolError::from_read)
    }

    pub fn f32(&mut self) -> Result<f32, ProtocolError> {
        self.cursor
            .read_f32::<LittleEndian>()
            .map_err(ProtocolError::from_read)
    }

    pub fn bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.u32()? != 0)
    }

    /// Borrow the next `len` bytes
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if len > self.remaining() {
            return Err(ProtocolError::UnexpectedEof);
        }
        let start = self.position();
        let data: &'a [u8] = self.cursor.get_ref();
        self.cursor.set_position((start + len) as u64);
        Ok(&data[start..start + len])
    }

    pub fn skip(&mut self, len: usize) -> Result<(), ProtocolError> {
        self.bytes(len).map(|_| ())
    }

    /// Split off a reader over the next `len` bytes, advancing past them
    pub fn sub_reader(&mut self, len: usize) -> Result<WireReader<'a>, ProtocolError> {
        Ok(WireReader::new(self.bytes(len)?))
    }

    /// Read a padded string
    pub fn string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u32()? as usize;
        let raw = self.bytes(len)?;
        let value = std::str::from_utf8(raw)
            .map_err(|_| ProtocolError::InvalidString)?
            .to_owned();

        // The last string of a frame may come without its padding
        let padding = string_padding(len).min(self.remaining());
        self.skip(padding)?;

        Ok(value)
    }

    /// Read `count` little-endian u32 values
    pub fn u32_values(&mut self, count: usize) -> Result<Vec<u32>, ProtocolError> {
        self.ensure_elements(count)?;
        let mut values = vec![0u32; count];
        self.cursor
            .read_u32_into::<LittleEndian>(&mut values)
            .map_err(ProtocolError::from_read)?;
        Ok(values)
    }

    /// Read `count` little-endian f32 values
    pub fn f32_values(&mut self, count: usize) -> Result<Vec<f32>, ProtocolError> {
        self.ensure_elements(count)?;
        let mut values = vec![0f32; count];
        self.cursor
            .read_f32_into::<LittleEndian>(&mut values)
            .map_err(ProtocolError::from_read)?;
        Ok(values)
    }

    /// Read a `u32 count` prefix followed by `count × arity` u32 values
    pub fn u32_array(&mut self, arity: usize) -> Result<Vec<u32>, ProtocolError> {
        let count = self.element_count(arity)?;
        self.u32_values(count)
    }

    /// Read a `u32 count` prefix followed by `count × arity` f32 values
    pub fn f32_array(&mut self, arity: usize) -> Result<Vec<f32>, ProtocolError> {
        let count = self.element_count(arity)?;
        self.f32_values(count)
    }

    fn element_count(&mut self, arity: usize) -> Result<usize, ProtocolError> {
        (self.u32()? as usize)
            .checked_mul(arity)
            .ok_or(ProtocolError::UnexpectedEof)
    }

    // Reject counts the payload cannot hold before allocating for them
    fn ensure_elements(&self, count: usize) -> Result<(), ProtocolError> {
        match count.checked_mul(4) {
            Some(bytes) if bytes <= self.remaining() => Ok(()),
            _ => Err(ProtocolError::UnexpectedEof),
        }
    }
}

/// Growable little-endian payload builder
#[derive(Debug, Default)]
pub struct WireWriter {
    buffer: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn u32(&mut self, value: u32) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.buffer.extend_from_slice(&bytes);
    }

    pub fn i32(&mut self, value: i32) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_i32(&mut bytes, value);
        self.buffer.extend_from_slice(&bytes);
    }

    pub fn f32(&mut self, value: f32) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_f32(&mut bytes, value);
        self.buffer.extend_from_slice(&bytes);
    }

    pub fn bool(&mut self, value: bool) {
        self.u32(u32::from(value));
    }

    /// Write a padded string
    pub fn string(&mut self, value: &str) {
        self.u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
        let padded = self.buffer.len() + string_padding(value.len());
        self.buffer.resize(padded, 0);
    }

    pub fn u32_values(&mut self, values: &[u32]) {
        let start = self.buffer.len();
        self.buffer.resize(start + values.len() * 4, 0);
        LittleEndian::write_u32_into(values, &mut self.buffer[start..]);
    }

    pub fn f32_values(&mut self, values: &[f32]) {
        let start = self.buffer.len();
        self.buffer.resize(start + values.len() * 4, 0);
        LittleEndian::write_f32_into(values, &mut self.buffer[start..]);
    }

    /// Write `values.len() / arity` followed by the values
    pub fn u32_array(&mut self, values: &[u32], arity: usize) {
        self.u32((values.len() / arity) as u32);
        self.u32_values(values);
    }

    /// Write `values.len() / arity` followed by the values
    pub fn f32_array(&mut self, values: &[f32], arity: usize) {
        self.u32((values.len() / arity) as u32);
        self.f32_values(values);
    }

    /// Write a `u32` byte length followed by whatever `body` writes
    pub fn length_prefixed(&mut self, body: impl FnOnce(&mut WireWriter)) {
        let length_at = self.buffer.len();
        self.u32(0);
        body(self);
        let length = (self.buffer.len() - length_at - 4) as u32;
        LittleEndian::write_u32(&mut self.buffer[length_at..length_at + 4], length);
    }
}
