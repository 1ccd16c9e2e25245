//! Session admission packets: manifest exchange and the host's verdict.
//!
//! ```text
//! client                         host
//!   │ ── ManifestOffer ─────────→ │  validate against host manifest
//!   │ ←──────── AdmissionVerdict ─│  approved? + itemized reasons
//! ```

use crate::wire::{LENGTH_PREFIX, WireItem, WireReader, WireWriter};
use crate::{PacketBody, PacketType, PeerId, ProtocolError};

/// Asks a peer for its manifest. Clients address the request to another
/// client through the host, which forwards it to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestRequest {
    pub requester: PeerId,
    pub target: PeerId,
}

impl PacketBody for ManifestRequest {
    const TYPE: PacketType = PacketType::MANIFEST_REQUEST;
    const NAME: &'static str = "ManifestRequest";

    fn write(&self, w: &mut WireWriter) {
        w.put_peer(self.requester);
        w.put_peer(self.target);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            requester: r.get_peer()?,
            target: r.get_peer()?,
        })
    }
}

/// One `(extension id, version)` pair as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OfferedEntry {
    pub id: String,
    pub version: String,
}

impl WireItem for OfferedEntry {
    const MIN_WIRE_SIZE: usize = 2 * LENGTH_PREFIX;

    fn write_to(&self, w: &mut WireWriter) {
        w.put_str(&self.id);
        w.put_str(&self.version);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: r.get_str("entry.id")?,
            version: r.get_str("entry.version")?,
        })
    }
}

/// A connecting client's declared extensions and build.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestOffer {
    pub client: PeerId,
    pub entries: Vec<OfferedEntry>,
    pub build: String,
    pub rollup_hash: u64,
}

impl PacketBody for ManifestOffer {
    const TYPE: PacketType = PacketType::MANIFEST_OFFER;
    const NAME: &'static str = "ManifestOffer";

    fn write(&self, w: &mut WireWriter) {
        w.put_peer(self.client);
        w.put_list(&self.entries);
        w.put_str(&self.build);
        w.put_u64(self.rollup_hash);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            client: r.get_peer()?,
            entries: r.get_list()?,
            build: r.get_str("build")?,
            rollup_hash: r.get_u64()?,
        })
    }
}

/// The host's answer to a [`ManifestOffer`], sent only to that client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdmissionVerdict {
    pub client: PeerId,
    pub approved: bool,
    pub reason: String,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub mismatched: Vec<String>,
    /// Numeric store ids among `missing`, so the client can offer to
    /// subscribe to them.
    pub missing_workshop_ids: Vec<u64>,
}

impl PacketBody for AdmissionVerdict {
    const TYPE: PacketType = PacketType::ADMISSION_VERDICT;
    const NAME: &'static str = "AdmissionVerdict";

    fn write(&self, w: &mut WireWriter) {
        w.put_peer(self.client);
        w.put_bool(self.approved);
        w.put_str(&self.reason);
        w.put_str_list(&self.missing);
        w.put_str_list(&self.extra);
        w.put_str_list(&self.mismatched);
        w.put_u64_list(&self.missing_workshop_ids);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            client: r.get_peer()?,
            approved: r.get_bool("approved")?,
            reason: r.get_str("reason")?,
            missing: r.get_str_list("missing")?,
            extra: r.get_str_list("extra")?,
            mismatched: r.get_str_list("mismatched")?,
            missing_workshop_ids: r.get_u64_list()?,
        })
    }
}
