//! Chunked transfer of large payloads (world saves) for colonylink.
//!
//! ```text
//! host                                         client
//! ChunkStream ── SaveFileChunk(offset) ──────→ Assembler (bitmap, buffer)
//!   (2 per tick, backpressure)                   │ every 5%
//! SyncBoard  ←──────────── SyncProgress ─────────┘
//!            ←──────────── SaveFileRequest ─── stall: full resend
//! ```
//!
//! Chunks are addressed by byte offset and may arrive in any order or more
//! than once. The receiver never asks for individual chunks: a transfer
//! that stalls is dropped and requested again from the start.

mod assembler;
mod board;
mod chunker;
mod config;
mod error;

pub use assembler::{
    Assembler, ChunkOutcome, CompletedTransfer, REPORT_STEP, StallAction, TransferProgress,
    progress_bar,
};
pub use board::{BOARD_BAR_WIDTH, ClientSync, SyncBoard};
pub use chunker::{ChunkPlan, ChunkSend, ChunkStream, Outbox, Pumped, StreamStatus};
pub use config::{CHUNK_HEADER_RESERVE, MIN_CHUNK_SIZE_KB, StallPolicy, TransferConfig};
pub use error::{ChunkError, TransferError};
