use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest chunk the sender will use, in KiB.
pub const MIN_CHUNK_SIZE_KB: usize = 64;

/// Bytes of each message budget set aside for the chunk header, so a full
/// chunk plus its file id still fits.
pub const CHUNK_HEADER_RESERVE: usize = 256;

/// Transfer tuning, read once at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Outbound chunk size in KiB. Never below [`MIN_CHUNK_SIZE_KB`].
    pub chunk_size_kb: usize,
    /// Chunks handed to the transport per tick per target.
    pub chunks_per_tick: usize,
    /// Inactivity after which a transfer is examined for stalling.
    pub stall_after_secs: u64,
    /// Minimum gap between two stall examinations of one transfer.
    pub stall_check_spacing_secs: u64,
    /// Consecutive stalled examinations before a full resend is requested.
    pub max_stall_checks: u32,
    /// How often the node runs the stall sweep at all.
    pub stall_check_interval_secs: u64,
    /// Ticks between transfer completion and handing the payload to the
    /// engine.
    pub load_delay_ticks: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_kb: 256,
            chunks_per_tick: 2,
            stall_after_secs: 10,
            stall_check_spacing_secs: 10,
            max_stall_checks: 3,
            stall_check_interval_secs: 5,
            load_delay_ticks: 1,
        }
    }
}

impl TransferConfig {
    /// Clamps values that would break the transfer loop.
    pub fn validated(mut self) -> Self {
        if self.chunk_size_kb < MIN_CHUNK_SIZE_KB {
            tracing::warn!(
                configured = self.chunk_size_kb,
                min = MIN_CHUNK_SIZE_KB,
                "chunk_size_kb below floor, clamping"
            );
            self.chunk_size_kb = MIN_CHUNK_SIZE_KB;
        }
        if self.chunks_per_tick == 0 {
            tracing::warn!("chunks_per_tick is 0, using 1");
            self.chunks_per_tick = 1;
        }
        if self.max_stall_checks == 0 {
            tracing::warn!("max_stall_checks is 0, using 1");
            self.max_stall_checks = 1;
        }
        if self.stall_check_interval_secs == 0 {
            self.stall_check_interval_secs = 1;
        }
        self
    }

    /// Shrinks `chunk_size_kb` so one chunk plus [`CHUNK_HEADER_RESERVE`]
    /// fits in a message of `max_message_bytes`. Never goes below
    /// [`MIN_CHUNK_SIZE_KB`]; the caller keeps the ceiling above that.
    pub fn fit_to(mut self, max_message_bytes: usize) -> Self {
        let fits_kb = max_message_bytes.saturating_sub(CHUNK_HEADER_RESERVE) / 1024;
        let limit_kb = fits_kb.max(MIN_CHUNK_SIZE_KB);
        if self.chunk_size_kb > limit_kb {
            tracing::warn!(
                configured = self.chunk_size_kb,
                limit = limit_kb,
                max_message_bytes,
                "chunk_size_kb exceeds the reliable message limit, clamping"
            );
            self.chunk_size_kb = limit_kb;
        }
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size_kb * 1024
    }

    pub fn stall_policy(&self) -> StallPolicy {
        StallPolicy {
            stall_after: Duration::from_secs(self.stall_after_secs),
            check_spacing: Duration::from_secs(self.stall_check_spacing_secs),
            max_checks: self.max_stall_checks,
        }
    }

    pub fn stall_check_interval(&self) -> Duration {
        Duration::from_secs(self.stall_check_interval_secs)
    }
}

/// Receiver-side stall thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallPolicy {
    pub stall_after: Duration,
    pub check_spacing: Duration,
    pub max_checks: u32,
}

impl Default for StallPolicy {
    fn default() -> Self {
        TransferConfig::default().stall_policy()
    }
}
