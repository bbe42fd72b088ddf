//! Message chunks: a typed, length-prefixed segment of a Cthun message.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MessageError;

/// Mask selecting the chunk type from a descriptor byte.  The high nibble is
/// reserved and ignored on decode.
const DESCRIPTOR_TYPE_MASK: u8 = 0x0F;

/// Size of the per-chunk header: descriptor (u8) + content size (u32 BE).
pub const CHUNK_HEADER_LEN: usize = 5;

/// Type of a chunk within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChunkDescriptor {
    Envelope = 0x01,
    Data = 0x02,
    Debug = 0x03,
}

impl ChunkDescriptor {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkDescriptor::Envelope => "envelope",
            ChunkDescriptor::Data => "data",
            ChunkDescriptor::Debug => "debug",
        }
    }
}

impl TryFrom<u8> for ChunkDescriptor {
    type Error = MessageError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte & DESCRIPTOR_TYPE_MASK {
            0x01 => Ok(ChunkDescriptor::Envelope),
            0x02 => Ok(ChunkDescriptor::Data),
            0x03 => Ok(ChunkDescriptor::Debug),
            _ => Err(MessageError::UnknownDescriptor(byte)),
        }
    }
}

/// One chunk: its descriptor and raw content (JSON text or opaque bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    pub descriptor: ChunkDescriptor,
    pub content: Bytes,
}

impl MessageChunk {
    pub fn new(descriptor: ChunkDescriptor, content: impl Into<Bytes>) -> Self {
        Self {
            descriptor,
            content: content.into(),
        }
    }

    /// Number of bytes this chunk occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        CHUNK_HEADER_LEN + self.content.len()
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<(), MessageError> {
        let size = u32::try_from(self.content.len())
            .map_err(|_| MessageError::ChunkTooLarge(self.content.len()))?;
        buf.put_u8(self.descriptor as u8);
        buf.put_u32(size);
        buf.put_slice(&self.content);
        Ok(())
    }
}
