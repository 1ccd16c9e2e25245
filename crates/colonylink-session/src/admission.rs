//! Per-peer admission state machine.
//!
//! ```text
//! begin() ──→ [Connecting] ──resolve(approved)──→ [Approved]
//!                  │
//!                  └──────resolve(rejected)─────→ [Rejected { reason }]
//! ```
//!
//! Only `Connecting` may be resolved. A late or duplicated verdict for an
//! already-resolved peer is ignored.

use std::collections::HashMap;

use colonylink_protocol::PeerId;

use crate::{SessionError, Verdict};

/// Where a peer stands in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionState {
    /// Manifest sent or expected, no verdict yet.
    Connecting,
    Approved,
    Rejected { reason: String },
}

impl AdmissionState {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Admission state for every peer the handshake has seen.
///
/// The host keys it by client; a client has a single entry for its host.
#[derive(Debug, Default)]
pub struct Admission {
    states: HashMap<PeerId, AdmissionState>,
}

impl Admission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) the handshake for a peer.
    pub fn begin(&mut self, peer: PeerId) {
        if let Some(previous) = self.states.insert(peer, AdmissionState::Connecting) {
            tracing::debug!(%peer, ?previous, "admission restarted");
        }
    }

    /// Applies a verdict.
    ///
    /// # Errors
    /// [`SessionError::NotAwaitingAdmission`] when the peer is unknown or
    /// already resolved. The stored state is left unchanged.
    pub fn resolve(
        &mut self,
        peer: PeerId,
        verdict: &Verdict,
    ) -> Result<&AdmissionState, SessionError> {
        let state = match self.states.get_mut(&peer) {
            Some(state @ AdmissionState::Connecting) => state,
            Some(state) => {
                tracing::warn!(%peer, ?state, "verdict for already resolved peer ignored");
                return Err(SessionError::NotAwaitingAdmission(peer));
            }
            None => {
                tracing::warn!(%peer, "verdict for unknown peer ignored");
                return Err(SessionError::NotAwaitingAdmission(peer));
            }
        };

        *state = if verdict.approved {
            AdmissionState::Approved
        } else {
            AdmissionState::Rejected {
                reason: verdict.reason.clone(),
            }
        };
        tracing::info!(%peer, approved = verdict.approved, reason = %verdict.reason, "admission resolved");
        Ok(state)
    }

    pub fn state(&self, peer: PeerId) -> Option<&AdmissionState> {
        self.states.get(&peer)
    }

    pub fn is_approved(&self, peer: PeerId) -> bool {
        self.states.get(&peer).is_some_and(AdmissionState::is_approved)
    }

    pub fn forget(&mut self, peer: PeerId) -> Option<AdmissionState> {
        self.states.remove(&peer)
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
