//! Save-file transfer packets.

use bytes::Bytes;

use crate::wire::{LENGTH_PREFIX, WireReader, WireWriter};
use crate::{HEADER_LEN, PacketBody, PacketType, PeerId, ProtocolError};

/// Client → host: "send me the whole world save", also used to restart a
/// transfer from scratch after a stall.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaveFileRequest {
    pub requester: PeerId,
}

impl PacketBody for SaveFileRequest {
    const TYPE: PacketType = PacketType::SAVE_FILE_REQUEST;
    const NAME: &'static str = "SaveFileRequest";

    fn write(&self, w: &mut WireWriter) {
        w.put_peer(self.requester);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            requester: r.get_peer()?,
        })
    }
}

/// Host → client: one slice of a payload, addressed by byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaveFileChunk {
    pub file_id: String,
    pub total_size: i32,
    pub offset: i32,
    pub data: Bytes,
}

impl SaveFileChunk {
    /// Encoded size of a chunk minus its data, for a `file_id` of
    /// `file_id_len` bytes.
    pub const fn overhead(file_id_len: usize) -> usize {
        HEADER_LEN + LENGTH_PREFIX + file_id_len + 4 + 4 + LENGTH_PREFIX
    }
}

impl PacketBody for SaveFileChunk {
    const TYPE: PacketType = PacketType::SAVE_FILE_CHUNK;
    const NAME: &'static str = "SaveFileChunk";

    fn write(&self, w: &mut WireWriter) {
        w.put_str(&self.file_id);
        w.put_i32(self.total_size);
        w.put_i32(self.offset);
        w.put_bytes(&self.data);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            file_id: r.get_str("file_id")?,
            total_size: r.get_i32()?,
            offset: r.get_i32()?,
            data: r.get_bytes()?,
        })
    }
}

/// Client → host: download progress, sent at fixed percent steps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncProgress {
    pub client: PeerId,
    pub client_name: String,
    pub file_id: String,
    pub received_chunks: i32,
    pub total_chunks: i32,
    pub percent: u8,
}

impl PacketBody for SyncProgress {
    const TYPE: PacketType = PacketType::SYNC_PROGRESS;
    const NAME: &'static str = "SyncProgress";

    fn write(&self, w: &mut WireWriter) {
        w.put_peer(self.client);
        w.put_str(&self.client_name);
        w.put_str(&self.file_id);
        w.put_i32(self.received_chunks);
        w.put_i32(self.total_chunks);
        w.put_u8(self.percent);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let progress = Self {
            client: r.get_peer()?,
            client_name: r.get_str("client_name")?,
            file_id: r.get_str("file_id")?,
            received_chunks: r.get_i32()?,
            total_chunks: r.get_i32()?,
            percent: r.get_u8()?,
        };
        if progress.percent > 100 {
            return Err(ProtocolError::malformed(
                "percent",
                format!("{} is above 100", progress.percent),
            ));
        }
        Ok(progress)
    }
}
