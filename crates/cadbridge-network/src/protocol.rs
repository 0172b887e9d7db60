//! Message framing and protocol constants
//!
//! Every message travels as one frame: a little-endian `u32` payload length followed by the
//! payload. The payload itself always starts with a `u32` message type, see [`crate::codec`].

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;
use tracing::{debug, trace};

/// Maximum frame payload the server itself is willing to produce
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = u32::MAX as usize;

/// Status code of a successful response envelope
pub const STATUS_OK: u32 = 200;

/// Message types in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageType {
    Transaction = 0,
    Add = 1,
    Update = 2,
    Delete = 3,
    Move = 4,
    Attribute = 5,

    NewVersion = 10,
    NewFile = 11,

    ListAll = 20,
    ListSome = 21,
    ListVisible = 22,
    SubscribeAll = 23,
    SubscribeSome = 24,
    UnsubscribeAll = 25,
    RefacetSome = 26,
}

impl MessageType {
    /// Convert from u32 representation
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Transaction),
            1 => Some(Self::Add),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            4 => Some(Self::Move),
            5 => Some(Self::Attribute),
            10 => Some(Self::NewVersion),
            11 => Some(Self::NewFile),
            20 => Some(Self::ListAll),
            21 => Some(Self::ListSome),
            22 => Some(Self::ListVisible),
            23 => Some(Self::SubscribeAll),
            24 => Some(Self::SubscribeSome),
            25 => Some(Self::UnsubscribeAll),
            26 => Some(Self::RefacetSome),
            _ => None,
        }
    }

    /// Responses to these requests carry a `request_id | status` envelope
    pub fn has_response_envelope(self) -> bool {
        matches!(
            self,
            Self::ListAll | Self::ListSome | Self::ListVisible | Self::RefacetSome
        )
    }
}

/// Protocol error types
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid message type: {0}")]
    InvalidMessageType(u32),

    #[error("Invalid object type: {0}")]
    InvalidObjectType(u32),

    #[error("Invalid facet shape: {0}")]
    InvalidFacetShape(u32),

    #[error("Unexpected message type {0:?} in this position")]
    UnexpectedMessageType(MessageType),

    #[error("Message too large: {size} bytes exceeds maximum {max_size} bytes")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("String is not valid UTF-8")]
    InvalidString,

    #[error("Unexpected end of message")]
    UnexpectedEof,
}

impl ProtocolError {
    /// Map a read failure on an in-memory buffer to a truncation error
    pub(crate) fn from_read(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(error)
        }
    }
}

/// Frame reader/writer with a size limit
#[derive(Debug, Clone, Copy)]
pub struct Protocol {
    max_message_size: usize,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Protocol {
    /// Create a new protocol handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum message size
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Write one frame to a stream
    pub fn write_frame<W: Write>(&self, writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError> {
        use byteorder::{LittleEndian, WriteBytesExt};

        if payload.len() > self.max_message_size || payload.len() > u32::MAX as usize {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max_size: self.max_message_size,
            });
        }

        debug!("Writing frame: payload_size={}", payload.len());

        writer.write_u32::<LittleEndian>(payload.len() as u32)?;
        writer.write_all(payload)?;
        writer.flush()?;

        trace!("Frame written successfully");
        Ok(())
    }

    /// Read one frame from a stream
    pub fn read_frame<R: Read>(&self, reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
        use byteorder::{LittleEndian, ReadBytesExt};

        trace!("Reading frame header");

        let payload_size = reader.read_u32::<LittleEndian>()? as usize;

        debug!("Frame header: size={}", payload_size);

        if payload_size > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: payload_size,
                max_size: self.max_message_size,
            });
        }

        // Grows with the bytes that arrive rather than the size the header claims
        let mut payload = Vec::new();
        reader
            .by_ref()
            .take(payload_size as u64)
            .read_to_end(&mut payload)?;
        if payload.len() < payload_size {
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("frame truncated at {} of {} bytes", payload.len(), payload_size),
            )));
        }

        trace!("Frame read successfully");
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_write_read() {
        let protocol = Protocol::default();
        let mut buffer = Vec::new();
        protocol.write_frame(&mut buffer, &[20, 0, 0, 0, 1, 0, 0, 0]).unwrap();
        assert_eq!(&buffer[..4], &[8, 0, 0, 0]);

        let mut cursor = Cursor::new(buffer);
        let payload = protocol.read_frame(&mut cursor).unwrap();
        assert_eq!(payload, vec![20, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_frame_too_large() {
        let protocol = Protocol::default().with_max_message_size(4);
        let mut buffer = Vec::new();
        let result = protocol.write_frame(&mut buffer, &[0; 16]);
        assert!(matches!(result, Err(ProtocolError::MessageTooLarge { .. })));

        let mut cursor = Cursor::new(vec![16, 0, 0, 0]);
        let result = protocol.read_frame(&mut cursor);
        assert!(matches!(
            result,
            Err(ProtocolError::MessageTooLarge { size: 16, max_size: 4 })
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let protocol = Protocol::default();
        let mut cursor = Cursor::new(vec![8, 0, 0, 0, 1, 2]);
        assert!(matches!(
            protocol.read_frame(&mut cursor),
            Err(ProtocolError::Io(_))
        ));
    }

    #[test]
    fn test_oversized_header_with_short_body() {
        // Header claims nearly 4 GiB, only three bytes follow
        let protocol = Protocol::default();
        let mut frame = (u32::MAX - 1).to_le_bytes().to_vec();
        frame.extend_from_slice(&[1, 2, 3]);

        let mut cursor = Cursor::new(frame);
        match protocol.read_frame(&mut cursor) {
            Err(ProtocolError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
            }
            other => panic!("Expected a truncation error, got {:?}", other),
        }
    }

    #[test]
    fn test_message_type_codes() {
        assert_eq!(MessageType::from_u32(0), Some(MessageType::Transaction));
        assert_eq!(MessageType::from_u32(26), Some(MessageType::RefacetSome));
        assert_eq!(MessageType::from_u32(12), None);
        assert!(MessageType::ListVisible.has_response_envelope());
        assert!(!MessageType::Transaction.has_response_envelope());
    }
}
