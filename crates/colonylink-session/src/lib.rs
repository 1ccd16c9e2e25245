//! Session state and admission for colonylink.
//!
//! This crate answers three questions for a running node:
//!
//! 1. **Who is here?** ([`Session`], [`PeerTable`]): role, local and host
//!    identity, every known peer and its connection.
//! 2. **May they join?** ([`validate`], [`Verdict`]): the compatibility
//!    check comparing extension manifests.
//! 3. **Where are they in the handshake?** ([`Admission`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Node runtime (above)  ← owns the Session, reacts to admission packets
//!     ↕
//! Session layer (this crate)  ← identities, peer table, compatibility
//!     ↕
//! Protocol layer (below)  ← PeerId, ManifestOffer, AdmissionVerdict
//! ```

mod admission;
mod compat;
mod error;
mod peers;
mod session;

pub use admission::{Admission, AdmissionState};
pub use compat::{CompatPolicy, Manifest, ManifestEntry, Verdict, validate, validate_offer};
pub use error::SessionError;
pub use peers::{MAX_NAME_CHARS, Peer, PeerTable, display_name};
pub use session::{ReadySummary, Role, Session};
