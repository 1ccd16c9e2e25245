//! Sender side: splitting a payload and streaming it under backpressure.

use std::collections::BTreeMap;

use bytes::Bytes;
use colonylink_protocol::{PeerId, SaveFileChunk};

use crate::TransferError;

// ---------------------------------------------------------------------------
// ChunkPlan
// ---------------------------------------------------------------------------

/// How a payload of `total_size` bytes is cut into chunks.
///
/// Every chunk is `chunk_size` bytes except possibly the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_size: usize,
    chunk_size: usize,
}

impl ChunkPlan {
    pub fn new(total_size: usize, chunk_size: usize) -> Result<Self, TransferError> {
        if total_size == 0 {
            return Err(TransferError::EmptyPayload);
        }
        if chunk_size == 0 {
            return Err(TransferError::ZeroChunkSize);
        }
        if i32::try_from(total_size).is_err() {
            return Err(TransferError::TooLarge(total_size));
        }
        Ok(Self {
            total_size,
            chunk_size: chunk_size.min(total_size),
        })
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// `ceil(total_size / chunk_size)`
    pub fn chunk_count(&self) -> usize {
        self.total_size.div_ceil(self.chunk_size)
    }

    /// `(offset, len)` of chunk `index`, if it exists.
    pub fn chunk(&self, index: usize) -> Option<(usize, usize)> {
        let offset = index.checked_mul(self.chunk_size)?;
        (offset < self.total_size).then(|| (offset, self.chunk_size.min(self.total_size - offset)))
    }

    /// Every `(offset, len)` in order.
    pub fn chunks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.chunk_count()).filter_map(|i| self.chunk(i))
    }
}

// ---------------------------------------------------------------------------
// ChunkStream
// ---------------------------------------------------------------------------

/// What became of one chunk handed to the send callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSend {
    Accepted,
    /// The link is full right now. The chunk is offered again next tick.
    Busy,
    /// The chunk can never be delivered (too large for the link, receiver
    /// gone). The stream stops.
    Refused,
}

/// Result of one [`ChunkStream::pump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// More chunks remain. `sent` counts chunks accepted so far.
    InProgress { sent: usize, total: usize },
    Finished,
    /// A chunk was refused outright. The stream will not make progress.
    Failed { sent: usize },
}

/// One payload on its way to one receiver.
///
/// The stream only advances past a chunk once the transport accepted it.
/// A busy link ends the pump for this tick and the same chunk is offered
/// again on the next one. A refused chunk fails the stream.
#[derive(Debug, Clone)]
pub struct ChunkStream {
    file_id: String,
    payload: Bytes,
    plan: ChunkPlan,
    next: usize,
    chunks_per_tick: usize,
}

impl ChunkStream {
    pub fn new(
        file_id: impl Into<String>,
        payload: Bytes,
        chunk_size: usize,
        chunks_per_tick: usize,
    ) -> Result<Self, TransferError> {
        let plan = ChunkPlan::new(payload.len(), chunk_size)?;
        Ok(Self {
            file_id: file_id.into(),
            payload,
            plan,
            next: 0,
            chunks_per_tick: chunks_per_tick.max(1),
        })
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn is_finished(&self) -> bool {
        self.next >= self.plan.chunk_count()
    }

    /// The packet for chunk `index`. The data is a zero-copy slice of the
    /// payload.
    pub fn packet(&self, index: usize) -> Option<SaveFileChunk> {
        let (offset, len) = self.plan.chunk(index)?;
        // ChunkPlan::new guarantees both fit in i32.
        let total_size = i32::try_from(self.plan.total_size()).ok()?;
        let offset_i32 = i32::try_from(offset).ok()?;
        Some(SaveFileChunk {
            file_id: self.file_id.clone(),
            total_size,
            offset: offset_i32,
            data: self.payload.slice(offset..offset + len),
        })
    }

    /// Offers up to `chunks_per_tick` chunks to `send`.
    pub fn pump(&mut self, mut send: impl FnMut(SaveFileChunk) -> ChunkSend) -> StreamStatus {
        for _ in 0..self.chunks_per_tick {
            let Some(packet) = self.packet(self.next) else {
                break;
            };
            match send(packet) {
                ChunkSend::Accepted => self.next += 1,
                ChunkSend::Busy => {
                    tracing::debug!(
                        file_id = %self.file_id,
                        chunk = self.next,
                        "link busy, retrying chunk next tick"
                    );
                    break;
                }
                ChunkSend::Refused => return StreamStatus::Failed { sent: self.next },
            }
        }

        if self.is_finished() {
            StreamStatus::Finished
        } else {
            StreamStatus::InProgress {
                sent: self.next,
                total: self.plan.chunk_count(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Peers whose stream ended during one [`Outbox::pump_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pumped {
    pub finished: Vec<PeerId>,
    pub failed: Vec<PeerId>,
}

/// Outbound streams, at most one per receiving peer.
#[derive(Debug, Default)]
pub struct Outbox {
    streams: BTreeMap<PeerId, ChunkStream>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a stream to `peer`, replacing any stream already running.
    /// A re-request therefore always restarts from offset 0.
    pub fn start(&mut self, peer: PeerId, stream: ChunkStream) {
        tracing::info!(
            %peer,
            file_id = %stream.file_id(),
            chunks = stream.plan().chunk_count(),
            bytes = stream.plan().total_size(),
            "starting transfer"
        );
        if self.streams.insert(peer, stream).is_some() {
            tracing::info!(%peer, "previous transfer to peer replaced");
        }
    }

    pub fn cancel(&mut self, peer: PeerId) -> bool {
        self.streams.remove(&peer).is_some()
    }

    /// Pumps every stream once. Finished and failed streams are dropped.
    pub fn pump_all(
        &mut self,
        mut send: impl FnMut(PeerId, SaveFileChunk) -> ChunkSend,
    ) -> Pumped {
        let mut pumped = Pumped::default();
        for (peer, stream) in &mut self.streams {
            match stream.pump(|chunk| send(*peer, chunk)) {
                StreamStatus::InProgress { .. } => {}
                StreamStatus::Finished => {
                    tracing::info!(%peer, file_id = %stream.file_id(), "all chunks sent");
                    pumped.finished.push(*peer);
                }
                StreamStatus::Failed { sent } => {
                    tracing::warn!(
                        %peer,
                        file_id = %stream.file_id(),
                        sent,
                        total = stream.plan().chunk_count(),
                        "chunk refused by link, transfer cancelled"
                    );
                    pumped.failed.push(*peer);
                }
            }
        }
        for peer in pumped.finished.iter().chain(&pumped.failed) {
            self.streams.remove(peer);
        }
        pumped
    }

    pub fn is_sending_to(&self, peer: PeerId) -> bool {
        self.streams.contains_key(&peer)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }
}

// =========================================================================
// Tests
// =========================================================================
