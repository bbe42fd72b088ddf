//! Message framing (panic-free).
//!
//! Parsing rules:
//! - Never index into the buffer; always check `remaining()` before reading.
//! - The envelope chunk comes first, the data chunk second, then debug chunks.

use bytes::{Buf, Bytes, BytesMut};

use crate::chunk::{ChunkDescriptor, MessageChunk, CHUNK_HEADER_LEN};
use crate::error::MessageError;
use crate::PROTOCOL_VERSION;

/// A complete Cthun message.  Immutable once built or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    version: u8,
    envelope: MessageChunk,
    data: MessageChunk,
    debug: Vec<MessageChunk>,
}

impl Message {
    /// Assemble a message from its envelope and data chunks.
    ///
    /// Returns [`MessageError::UnexpectedChunk`] if either chunk carries the
    /// wrong descriptor.
    pub fn new(envelope: MessageChunk, data: MessageChunk) -> Result<Self, MessageError> {
        expect_descriptor(&envelope, ChunkDescriptor::Envelope)?;
        expect_descriptor(&data, ChunkDescriptor::Data)?;
        Ok(Self {
            version: PROTOCOL_VERSION,
            envelope,
            data,
            debug: Vec::new(),
        })
    }

    /// Append debug chunks, consuming and returning the message.
    pub fn with_debug(
        mut self,
        debug: impl IntoIterator<Item = MessageChunk>,
    ) -> Result<Self, MessageError> {
        for chunk in debug {
            expect_descriptor(&chunk, ChunkDescriptor::Debug)?;
            self.debug.push(chunk);
        }
        Ok(self)
    }

    pub fn envelope(&self) -> &MessageChunk {
        &self.envelope
    }

    pub fn data(&self) -> &MessageChunk {
        &self.data
    }

    pub fn debug(&self) -> &[MessageChunk] {
        &self.debug
    }

    /// Encode to the wire format.
    pub fn serialize(&self) -> Result<Bytes, MessageError> {
        let len = 1
            + self.envelope.encoded_len()
            + self.data.encoded_len()
            + self.debug.iter().map(MessageChunk::encoded_len).sum::<usize>();
        let mut buf = BytesMut::with_capacity(len);
        buf.extend_from_slice(&[self.version]);
        self.envelope.encode(&mut buf)?;
        self.data.encode(&mut buf)?;
        for chunk in &self.debug {
            chunk.encode(&mut buf)?;
        }
        Ok(buf.freeze())
    }

    /// Decode a raw frame.  Content is sliced out of `raw` without copying.
    pub fn parse(raw: impl Into<Bytes>) -> Result<Self, MessageError> {
        let mut buf: Bytes = raw.into();
        if !buf.has_remaining() {
            return Err(MessageError::Empty);
        }

        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(MessageError::UnsupportedVersion(version));
        }

        let envelope = next_chunk(&mut buf)?.ok_or(MessageError::MissingChunk("envelope"))?;
        expect_descriptor(&envelope, ChunkDescriptor::Envelope)?;

        let data = next_chunk(&mut buf)?.ok_or(MessageError::MissingChunk("data"))?;
        expect_descriptor(&data, ChunkDescriptor::Data)?;

        let mut debug = Vec::new();
        while let Some(chunk) = next_chunk(&mut buf)? {
            expect_descriptor(&chunk, ChunkDescriptor::Debug)?;
            debug.push(chunk);
        }

        Ok(Self {
            version,
            envelope,
            data,
            debug,
        })
    }
}

fn next_chunk(buf: &mut Bytes) -> Result<Option<MessageChunk>, MessageError> {
    if !buf.has_remaining() {
        return Ok(None);
    }
    if buf.remaining() < CHUNK_HEADER_LEN {
        return Err(MessageError::Truncated(format!(
            "{} bytes left, header needs {CHUNK_HEADER_LEN}",
            buf.remaining()
        )));
    }

    let descriptor = ChunkDescriptor::try_from(buf.get_u8())?;
    let size = buf.get_u32() as usize;
    if buf.remaining() < size {
        return Err(MessageError::Truncated(format!(
            "{} chunk declares {size} bytes, {} left",
            descriptor.as_str(),
            buf.remaining()
        )));
    }

    let content = buf.split_to(size);
    Ok(Some(MessageChunk {
        descriptor,
        content,
    }))
}

fn expect_descriptor(chunk: &MessageChunk, expected: ChunkDescriptor) -> Result<(), MessageError> {
    if chunk.descriptor == expected {
        Ok(())
    } else {
        Err(MessageError::UnexpectedChunk(format!(
            "expected {}, got {}",
            expected.as_str(),
            chunk.descriptor.as_str()
        )))
    }
}
