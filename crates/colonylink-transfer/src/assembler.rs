//! Receiver side: reassembling chunks that may arrive in any order.
//!
//! Each in-flight payload is a [`Transfer`] keyed by file id. A transfer
//! tracks which chunk slots are filled with a bitmap, so progress is
//! "how many distinct chunks", never "how far the contiguous prefix
//! reaches".
//!
//! The chunk size is not on the wire. It is learned from the first
//! non-final chunk: every chunk except the last is exactly one chunk long.
//! If the final chunk happens to arrive first, its bytes are parked until
//! the size is known.
//!
//! ## Stall recovery
//!
//! [`Assembler::check_stalls`] runs on a slow timer, not per chunk. A
//! transfer that has been silent for `stall_after`, has more than five
//! chunks and is missing more than half of them counts one stalled check.
//! After `max_checks` consecutive stalled checks the partial transfer is
//! thrown away and a full resend is requested. There is no per-chunk
//! retransmission.

use std::collections::HashMap;
use std::collections::hash_map::{Entry, VacantEntry};
use std::time::Instant;

use bytes::Bytes;
use colonylink_protocol::SaveFileChunk;

use crate::{ChunkError, StallPolicy};

/// Chunks a transfer must hold before it can be considered stalled.
const STALL_MIN_RECEIVED: usize = 5;

/// Progress reports are sent when the percentage crosses a multiple of this.
pub const REPORT_STEP: u8 = 5;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub file_id: String,
    pub received_chunks: usize,
    /// 0 while the chunk size is still unknown.
    pub total_chunks: usize,
    /// `received × 100 / total`, rounded down.
    pub percent: u8,
    /// Set when this chunk moved progress into a new 5% step; the receiver
    /// should tell the sender.
    pub report: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub file_id: String,
    pub payload: Bytes,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// First chunk of a new transfer.
    Started(TransferProgress),
    Progress(TransferProgress),
    /// The slot was already filled. Its bytes were overwritten.
    Duplicate(TransferProgress),
    /// Every slot is filled; the transfer is gone from the assembler.
    Completed(CompletedTransfer),
    /// The chunk was dropped.
    Rejected(ChunkError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallAction {
    /// The partial transfer was discarded; ask the sender to start over.
    RequestFullResend { file_id: String },
}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Layout {
    chunk_size: usize,
    total_chunks: usize,
}

enum Placed {
    New,
    Duplicate,
}

#[derive(Debug)]
struct Transfer {
    file_id: String,
    total_size: usize,
    layout: Option<Layout>,
    received: Vec<bool>,
    received_count: usize,
    /// Final chunk that arrived before the layout was known.
    parked_tail: Option<(usize, usize)>,
    buffer: Vec<u8>,
    last_chunk_at: Instant,
    last_stall_check_at: Instant,
    stall_count: u32,
    reported_step: u8,
}

impl Transfer {
    fn new(file_id: &str, total_size: usize, now: Instant) -> Result<Self, ChunkError> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(total_size)
            .map_err(|_| ChunkError::Allocation(total_size))?;
        buffer.resize(total_size, 0);
        Ok(Self {
            file_id: file_id.to_string(),
            total_size,
            layout: None,
            received: Vec::new(),
            received_count: 0,
            parked_tail: None,
            buffer,
            last_chunk_at: now,
            last_stall_check_at: now,
            stall_count: 0,
            reported_step: 0,
        })
    }

    fn total_chunks(&self) -> usize {
        self.layout.map_or(0, |l| l.total_chunks)
    }

    fn percent(&self) -> u8 {
        match self.total_chunks() {
            0 => 0,
            total => (self.received_count * 100 / total) as u8,
        }
    }

    fn is_complete(&self) -> bool {
        self.layout.is_some() && self.received_count == self.total_chunks()
    }

    fn expected_len(&self, layout: Layout, index: usize) -> usize {
        let offset = index * layout.chunk_size;
        layout.chunk_size.min(self.total_size - offset)
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        self.buffer[offset..offset + data.len()].copy_from_slice(data);
    }

    fn check_overrun(&self, offset: usize, len: usize) -> Result<(), ChunkError> {
        if offset.saturating_add(len) > self.total_size {
            return Err(ChunkError::Overrun {
                offset,
                len,
                total: self.total_size,
            });
        }
        Ok(())
    }

    fn place(&mut self, offset: usize, data: &[u8]) -> Result<Placed, ChunkError> {
        let layout = match self.layout {
            Some(layout) => layout,
            None => {
                let already_parked = self.parked_tail.is_some();
                match self.learn_layout(offset, data)? {
                    Some(layout) => layout,
                    None if already_parked => return Ok(Placed::Duplicate),
                    None => return Ok(Placed::New),
                }
            }
        };

        if offset % layout.chunk_size != 0 {
            return Err(ChunkError::Misaligned {
                offset,
                chunk_size: layout.chunk_size,
            });
        }
        let index = offset / layout.chunk_size;
        if index >= layout.total_chunks {
            return Err(ChunkError::OutOfRange {
                index,
                total_chunks: layout.total_chunks,
            });
        }
        let expected = self.expected_len(layout, index);
        if data.len() != expected {
            return Err(ChunkError::WrongLength {
                index,
                expected,
                got: data.len(),
            });
        }

        self.write(offset, data);
        if self.received[index] {
            return Ok(Placed::Duplicate);
        }
        self.received[index] = true;
        self.received_count += 1;
        Ok(Placed::New)
    }

    /// Handles a chunk while the chunk size is unknown. Returns the layout
    /// once it can be derived, or `None` if the chunk was parked.
    fn learn_layout(&mut self, offset: usize, data: &[u8]) -> Result<Option<Layout>, ChunkError> {
        self.check_overrun(offset, data.len())?;
        let is_final = offset + data.len() == self.total_size;

        if is_final && offset > 0 {
            match self.parked_tail {
                Some(tail) if tail != (offset, data.len()) => {
                    return Err(ChunkError::ConflictingTail(offset));
                }
                _ => {}
            }
            self.write(offset, data);
            self.parked_tail = Some((offset, data.len()));
            return Ok(None);
        }

        let chunk_size = data.len();
        if offset % chunk_size != 0 {
            return Err(ChunkError::Misaligned { offset, chunk_size });
        }
        let layout = Layout {
            chunk_size,
            total_chunks: self.total_size.div_ceil(chunk_size),
        };
        self.layout = Some(layout);
        self.received = vec![false; layout.total_chunks];

        if let Some((tail_offset, tail_len)) = self.parked_tail.take() {
            let last = layout.total_chunks - 1;
            if tail_offset == last * chunk_size && tail_len == self.expected_len(layout, last) {
                self.received[last] = true;
                self.received_count += 1;
            } else {
                tracing::warn!(
                    file_id = %self.file_id,
                    tail_offset,
                    chunk_size,
                    "parked final chunk does not fit the chunk size, discarded"
                );
            }
        }
        Ok(Some(layout))
    }

    fn progress(&mut self, first: bool) -> TransferProgress {
        let percent = self.percent();
        let step = percent - percent % REPORT_STEP;
        let report = if first || step > self.reported_step {
            self.reported_step = step;
            Some(percent)
        } else {
            None
        };
        TransferProgress {
            file_id: self.file_id.clone(),
            received_chunks: self.received_count,
            total_chunks: self.total_chunks(),
            percent,
            report,
        }
    }

    fn into_completed(self) -> CompletedTransfer {
        CompletedTransfer {
            total_chunks: self.total_chunks(),
            file_id: self.file_id,
            payload: Bytes::from(self.buffer),
        }
    }
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// All in-flight inbound transfers of one node.
#[derive(Debug, Default)]
pub struct Assembler {
    transfers: HashMap<String, Transfer>,
    policy: StallPolicy,
}

impl Assembler {
    pub fn new(policy: StallPolicy) -> Self {
        Self {
            transfers: HashMap::new(),
            policy,
        }
    }

    /// Applies one received chunk.
    pub fn receive(&mut self, chunk: &SaveFileChunk, now: Instant) -> ChunkOutcome {
        match self.try_receive(chunk, now) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    file_id = %chunk.file_id,
                    offset = chunk.offset,
                    len = chunk.data.len(),
                    error = %err,
                    "chunk dropped"
                );
                ChunkOutcome::Rejected(err)
            }
        }
    }

    fn try_receive(&mut self, chunk: &SaveFileChunk, now: Instant) -> Result<ChunkOutcome, ChunkError> {
        let total_size = usize::try_from(chunk.total_size)
            .ok()
            .filter(|t| *t > 0)
            .ok_or(ChunkError::InvalidTotal(chunk.total_size))?;
        let offset = usize::try_from(chunk.offset).map_err(|_| ChunkError::NegativeOffset(chunk.offset))?;
        if chunk.data.is_empty() {
            return Err(ChunkError::EmptyChunk);
        }

        let mut entry = match self.transfers.entry(chunk.file_id.clone()) {
            Entry::Vacant(slot) => return start(slot, chunk, total_size, offset, now),
            Entry::Occupied(entry) => entry,
        };
        let transfer = entry.get_mut();
        if transfer.total_size != total_size {
            return Err(ChunkError::TotalSizeChanged {
                expected: transfer.total_size,
                got: total_size,
            });
        }

        let placed = transfer.place(offset, &chunk.data)?;
        transfer.last_chunk_at = now;
        transfer.stall_count = 0;

        if transfer.is_complete() {
            let completed = entry.remove().into_completed();
            tracing::info!(
                file_id = %completed.file_id,
                bytes = completed.payload.len(),
                chunks = completed.total_chunks,
                "transfer complete"
            );
            return Ok(ChunkOutcome::Completed(completed));
        }

        Ok(match placed {
            Placed::New => ChunkOutcome::Progress(transfer.progress(false)),
            Placed::Duplicate => {
                tracing::debug!(file_id = %chunk.file_id, offset, "duplicate chunk overwritten");
                let mut progress = transfer.progress(false);
                progress.report = None;
                ChunkOutcome::Duplicate(progress)
            }
        })
    }

    /// Examines every transfer for stalling. See the module docs.
    pub fn check_stalls(&mut self, now: Instant) -> Vec<StallAction> {
        let policy = self.policy;
        let mut give_up = Vec::new();

        for (file_id, t) in &mut self.transfers {
            if now.saturating_duration_since(t.last_chunk_at) <= policy.stall_after {
                continue;
            }
            if now.saturating_duration_since(t.last_stall_check_at) < policy.check_spacing {
                continue;
            }
            t.last_stall_check_at = now;

            let total = t.total_chunks();
            let missing = total - t.received_count;
            if t.received_count > STALL_MIN_RECEIVED && missing > total / 2 {
                t.stall_count += 1;
                tracing::warn!(
                    %file_id,
                    received = t.received_count,
                    total,
                    stall_count = t.stall_count,
                    "transfer stalled"
                );
                if t.stall_count >= policy.max_checks {
                    give_up.push(file_id.clone());
                }
            } else {
                t.stall_count = 0;
            }
        }

        give_up
            .into_iter()
            .map(|file_id| {
                self.transfers.remove(&file_id);
                tracing::warn!(%file_id, "transfer abandoned, requesting full resend");
                StallAction::RequestFullResend { file_id }
            })
            .collect()
    }

    /// Drops a partial transfer. The sender is not told.
    pub fn abandon(&mut self, file_id: &str) -> bool {
        let removed = self.transfers.remove(file_id).is_some();
        if removed {
            tracing::info!(file_id, "transfer abandoned");
        }
        removed
    }

    pub fn abandon_all(&mut self) {
        if !self.transfers.is_empty() {
            tracing::info!(count = self.transfers.len(), "abandoning all transfers");
        }
        self.transfers.clear();
    }

    /// File ids of in-flight transfers, sorted.
    pub fn is_receiving(&self) -> bool {
        !self.transfers.is_empty()
    }

    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.transfers.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn percent(&self, file_id: &str) -> Option<u8> {
        self.transfers.get(file_id).map(Transfer::percent)
    }
}

/// Creates the transfer for a first chunk. A payload that fits one chunk
/// completes without ever occupying the slot.
fn start(
    slot: VacantEntry<'_, String, Transfer>,
    chunk: &SaveFileChunk,
    total_size: usize,
    offset: usize,
    now: Instant,
) -> Result<ChunkOutcome, ChunkError> {
    let mut transfer = Transfer::new(&chunk.file_id, total_size, now)?;
    transfer.place(offset, &chunk.data)?;

    if transfer.is_complete() {
        tracing::info!(file_id = %chunk.file_id, bytes = total_size, "single-chunk transfer complete");
        return Ok(ChunkOutcome::Completed(transfer.into_completed()));
    }

    let progress = transfer.progress(true);
    tracing::info!(
        file_id = %chunk.file_id,
        bytes = total_size,
        chunks = progress.total_chunks,
        "transfer started"
    );
    slot.insert(transfer);
    Ok(ChunkOutcome::Started(progress))
}

/// ASCII progress bar: `[====------] 42%`.
pub fn progress_bar(percent: u8, width: usize) -> String {
    let percent = percent.min(100);
    let filled = width * usize::from(percent) / 100;
    format!(
        "[{}{}] {percent}%",
        "=".repeat(filled),
        "-".repeat(width - filled)
    )
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn chunk(file_id: &str, total: i32, offset: i32, len: usize) -> SaveFileChunk {
        SaveFileChunk {
            file_id: file_id.into(),
            total_size: total,
            offset,
            data: Bytes::from(vec![(offset / 1000) as u8; len]),
        }
    }

    fn progress(outcome: ChunkOutcome) -> TransferProgress {
        match outcome {
            ChunkOutcome::Started(p) | ChunkOutcome::Progress(p) | ChunkOutcome::Duplicate(p) => p,
            other => panic!("expected progress, got {other:?}"),
        }
    }

    // =====================================================================
    // receive()
    // =====================================================================

    #[test]
    fn test_receive_first_chunk_starts_and_reports() {
        let mut asm = Assembler::default();
        let p = progress(asm.receive(&chunk("w", 10_000, 0, 1_000), Instant::now()));
        assert_eq!(p.total_chunks, 10);
        assert_eq!(p.percent, 10);
        assert_eq!(p.report, Some(10));
        assert_eq!(asm.in_flight(), vec!["w".to_string()]);
    }

    #[test]
    fn test_receive_single_chunk_payload_completes_immediately() {
        let mut asm = Assembler::default();
        let outcome = asm.receive(&chunk("w", 500, 0, 500), Instant::now());
        assert!(matches!(outcome, ChunkOutcome::Completed(c) if c.payload.len() == 500));
        assert!(asm.in_flight().is_empty());
    }

    #[test]
    fn test_receive_duplicate_is_reported_not_counted() {
        let mut asm = Assembler::default();
        let now = Instant::now();
        asm.receive(&chunk("w", 10_000, 0, 1_000), now);
        let outcome = asm.receive(&chunk("w", 10_000, 0, 1_000), now);
        let ChunkOutcome::Duplicate(p) = outcome else {
            panic!("expected duplicate");
        };
        assert_eq!(p.received_chunks, 1);
        assert_eq!(p.report, None);
    }

    #[test]
    fn test_receive_misaligned_offset_is_rejected() {
        let mut asm = Assembler::default();
        let now = Instant::now();
        asm.receive(&chunk("w", 10_000, 0, 1_000), now);
        let outcome = asm.receive(&chunk("w", 10_000, 1_500, 1_000), now);
        assert_eq!(
            outcome,
            ChunkOutcome::Rejected(ChunkError::Misaligned { offset: 1_500, chunk_size: 1_000 })
        );
    }

    #[test]
    fn test_receive_index_out_of_range_is_rejected() {
        let mut asm = Assembler::default();
        let now = Instant::now();
        asm.receive(&chunk("w", 10_000, 0, 1_000), now);
        let outcome = asm.receive(&chunk("w", 10_000, 20_000, 1_000), now);
        assert!(matches!(outcome, ChunkOutcome::Rejected(ChunkError::OutOfRange { index: 20, .. })));
    }

    #[test]
    fn test_receive_oversized_chunk_is_rejected() {
        let mut asm = Assembler::default();
        let now = Instant::now();
        asm.receive(&chunk("w", 10_000, 0, 1_000), now);
        let outcome = asm.receive(&chunk("w", 10_000, 1_000, 1_200), now);
        assert!(matches!(outcome, ChunkOutcome::Rejected(ChunkError::WrongLength { index: 1, .. })));
    }

    #[test]
    fn test_receive_changed_total_is_rejected() {
        let mut asm = Assembler::default();
        let now = Instant::now();
        asm.receive(&chunk("w", 10_000, 0, 1_000), now);
        let outcome = asm.receive(&chunk("w", 9_000, 1_000, 1_000), now);
        assert!(matches!(outcome, ChunkOutcome::Rejected(ChunkError::TotalSizeChanged { .. })));
    }

    #[test]
    fn test_receive_invalid_header_fields_are_rejected() {
        let mut asm = Assembler::default();
        let now = Instant::now();
        assert_eq!(
            asm.receive(&chunk("w", 0, 0, 10), now),
            ChunkOutcome::Rejected(ChunkError::InvalidTotal(0))
        );
        assert_eq!(
            asm.receive(&chunk("w", 100, -10, 10), now),
            ChunkOutcome::Rejected(ChunkError::NegativeOffset(-10))
        );
        assert_eq!(
            asm.receive(&chunk("w", 100, 0, 0), now),
            ChunkOutcome::Rejected(ChunkError::EmptyChunk)
        );
        assert!(asm.in_flight().is_empty());
    }

    #[test]
    fn test_receive_final_chunk_first_is_parked_until_size_known() {
        let mut asm = Assembler::default();
        let now = Instant::now();

        let first = progress(asm.receive(&chunk("w", 2_500, 2_000, 500), now));
        assert_eq!(first.percent, 0);
        assert_eq!(first.report, Some(0));
        assert_eq!(first.total_chunks, 0);

        let second = progress(asm.receive(&chunk("w", 2_500, 1_000, 1_000), now));
        assert_eq!((second.received_chunks, second.total_chunks), (2, 3));

        assert!(matches!(
            asm.receive(&chunk("w", 2_500, 0, 1_000), now),
            ChunkOutcome::Completed(_)
        ));
    }

    #[test]
    fn test_receive_conflicting_parked_tails_are_rejected() {
        let mut asm = Assembler::default();
        let now = Instant::now();
        asm.receive(&chunk("w", 2_500, 2_000, 500), now);
        let outcome = asm.receive(&chunk("w", 2_500, 1_500, 1_000), now);
        assert_eq!(outcome, ChunkOutcome::Rejected(ChunkError::ConflictingTail(1_500)));
    }

    #[test]
    fn test_receive_reports_only_on_new_five_percent_step() {
        let mut asm = Assembler::default();
        let now = Instant::now();
        // 40 chunks: each chunk is 2.5%.
        let reports: Vec<Option<u8>> = (0..40)
            .filter_map(|i| match asm.receive(&chunk("w", 40_000, i * 1_000, 1_000), now) {
                ChunkOutcome::Started(p) | ChunkOutcome::Progress(p) => Some(p.report),
                _ => None,
            })
            .collect();
        assert_eq!(reports[0], Some(2));
        assert_eq!(reports[1], Some(5));
        assert_eq!(reports[2], None);
        assert_eq!(reports[3], Some(10));
    }

    // =====================================================================
    // check_stalls()
    // =====================================================================

    fn stalled_transfer(asm: &mut Assembler, t0: Instant) {
        for i in 0..6 {
            asm.receive(&chunk("w", 100_000, i * 1_000, 1_000), t0);
        }
    }

    #[test]
    fn test_check_stalls_third_spaced_check_requests_resend() {
        let mut asm = Assembler::default();
        let t0 = Instant::now();
        stalled_transfer(&mut asm, t0);

        assert!(asm.check_stalls(t0 + Duration::from_secs(11)).is_empty());
        assert!(asm.check_stalls(t0 + Duration::from_secs(21)).is_empty());
        let actions = asm.check_stalls(t0 + Duration::from_secs(31));

        assert_eq!(actions, vec![StallAction::RequestFullResend { file_id: "w".into() }]);
        assert!(asm.in_flight().is_empty());
    }

    #[test]
    fn test_check_stalls_closely_spaced_checks_do_not_count() {
        let mut asm = Assembler::default();
        let t0 = Instant::now();
        stalled_transfer(&mut asm, t0);

        for secs in [11, 12, 13, 14, 15, 16] {
            assert!(asm.check_stalls(t0 + Duration::from_secs(secs)).is_empty());
        }
        assert_eq!(asm.in_flight().len(), 1);
    }

    #[test]
    fn test_check_stalls_new_chunk_resets_count() {
        let mut asm = Assembler::default();
        let t0 = Instant::now();
        stalled_transfer(&mut asm, t0);

        asm.check_stalls(t0 + Duration::from_secs(11));
        asm.check_stalls(t0 + Duration::from_secs(21));
        let t1 = t0 + Duration::from_secs(22);
        asm.receive(&chunk("w", 100_000, 50_000, 1_000), t1);

        assert!(asm.check_stalls(t1 + Duration::from_secs(11)).is_empty());
        assert_eq!(asm.in_flight().len(), 1);
    }

    #[test]
    fn test_check_stalls_few_chunks_never_stall() {
        let mut asm = Assembler::default();
        let t0 = Instant::now();
        asm.receive(&chunk("w", 100_000, 0, 1_000), t0);

        for secs in [11, 21, 31, 41] {
            assert!(asm.check_stalls(t0 + Duration::from_secs(secs)).is_empty());
        }
    }

    // =====================================================================
    // abandon() / progress_bar()
    // =====================================================================

    #[test]
    fn test_abandon_discards_transfer() {
        let mut asm = Assembler::default();
        asm.receive(&chunk("w", 10_000, 0, 1_000), Instant::now());
        assert!(asm.abandon("w"));
        assert!(!asm.abandon("w"));
        assert_eq!(asm.percent("w"), None);
    }

    #[test]
    fn test_progress_bar_renders_fill_and_percent() {
        assert_eq!(progress_bar(42, 10), "[====------] 42%");
        assert_eq!(progress_bar(0, 4), "[----] 0%");
        assert_eq!(progress_bar(100, 4), "[====] 100%");
        assert_eq!(progress_bar(250, 4), "[====] 100%");
    }
}
