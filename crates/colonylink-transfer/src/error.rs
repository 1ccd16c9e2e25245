//! Error types for chunked transfers.

/// Why a received chunk was dropped.
///
/// A rejected chunk never aborts its transfer. It is logged and discarded,
/// and stall detection takes over if too much goes missing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("declared total size {0} is not positive")]
    InvalidTotal(i32),

    #[error("chunk carries no data")]
    EmptyChunk,

    #[error("negative offset {0}")]
    NegativeOffset(i32),

    /// The chunk extends past the declared payload.
    #[error("chunk at offset {offset} with {len} bytes overruns total size {total}")]
    Overrun { offset: usize, len: usize, total: usize },

    #[error("offset {offset} is not a multiple of chunk size {chunk_size}")]
    Misaligned { offset: usize, chunk_size: usize },

    #[error("chunk index {index} out of range (transfer has {total_chunks})")]
    OutOfRange { index: usize, total_chunks: usize },

    /// The chunk does not fill its slot exactly.
    #[error("chunk {index} has {got} bytes, slot holds {expected}")]
    WrongLength { index: usize, expected: usize, got: usize },

    /// A later chunk disagrees with the transfer's declared size.
    #[error("total size changed mid-transfer: expected {expected}, got {got}")]
    TotalSizeChanged { expected: usize, got: usize },

    /// Two different final chunks arrived before the chunk size was known.
    #[error("conflicting final chunk at offset {0}")]
    ConflictingTail(usize),

    /// The reassembly buffer could not be allocated.
    #[error("cannot allocate {0} bytes for reassembly")]
    Allocation(usize),
}

/// Errors while preparing an outbound transfer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("nothing to send: payload is empty")]
    EmptyPayload,

    #[error("chunk size must be positive")]
    ZeroChunkSize,

    /// Offsets and sizes travel as `i32`.
    #[error("payload of {0} bytes exceeds the 2 GiB wire limit")]
    TooLarge(usize),
}
