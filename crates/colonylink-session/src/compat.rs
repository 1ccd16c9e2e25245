//! Compatibility manifests and the admission check.
//!
//! Before a client may download the world, the host compares the client's
//! declared extensions against its own. The check is a pure function of
//! `(host manifest, client manifest, policy)`: same inputs, same verdict,
//! same ordering of every list inside it.
//!
//! ## Rules, in order
//!
//! 1. Different build fingerprint → rejected outright.
//! 2. Host entry marked `required` missing on the client → *missing*.
//!    Non-required entries only produce a warning.
//! 3. Version differs → *mismatch*, unless the entry or the policy allows
//!    version drift, in which case it becomes a warning.
//! 4. Client-only critical entries → *extra*. Extras reject only in strict
//!    mode.
//! 5. Rollup hash differs while the counts agree → warning only (usually
//!    just a load-order difference).

use std::collections::{BTreeMap, BTreeSet};

use colonylink_protocol::{AdmissionVerdict, ManifestOffer, OfferedEntry, PeerId};
use serde::{Deserialize, Serialize};

/// Substrings marking entries that never matter for compatibility.
const NON_CRITICAL_MARKERS: [&str; 3] = ["Local-Testing-Mod", "Debug-Mod", "DevTool"];

const FNV_OFFSET: u64 = 14_695_981_039_346_656_037;
const FNV_PRIME: u64 = 1_099_511_628_211;

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// One installed extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestEntry {
    pub id: String,
    pub version: String,
    /// Human-readable name. Falls back to the id when empty.
    pub title: String,
    pub required: bool,
    pub allow_version_mismatch: bool,
}

impl Default for ManifestEntry {
    fn default() -> Self {
        Self {
            id: String::new(),
            version: String::new(),
            title: String::new(),
            required: true,
            allow_version_mismatch: false,
        }
    }
}

impl ManifestEntry {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn any_version(mut self) -> Self {
        self.allow_version_mismatch = true;
        self
    }

    /// Development-only entries are ignored when they appear as extras.
    pub fn is_critical(&self) -> bool {
        !NON_CRITICAL_MARKERS.iter().any(|m| self.id.contains(m))
    }

    /// `"Title - id"`, or just the id when there is no title.
    pub fn display_name(&self) -> String {
        if self.title.is_empty() || self.title == self.id {
            self.id.clone()
        } else {
            format!("{} - {}", self.title, self.id)
        }
    }
}

/// Everything a node declares about its installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    /// Build fingerprint of the simulation engine.
    pub build: String,
}

impl Manifest {
    pub fn new(build: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            build: build.into(),
        }
    }

    pub fn with_entry(mut self, entry: ManifestEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Order-insensitive fingerprint of the entry set and build.
    ///
    /// FNV-1a 64 over `"id:version"` pairs sorted by id, joined with `|`,
    /// followed by `":" + build`. Code units are hashed as UTF-16 so the
    /// value matches peers that hash their native strings that way. An
    /// empty manifest hashes to 0.
    pub fn rollup_hash(&self) -> u64 {
        if self.entries.is_empty() {
            return 0;
        }
        let mut sorted: Vec<&ManifestEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let joined = sorted
            .iter()
            .map(|e| format!("{}:{}", e.id, e.version))
            .collect::<Vec<_>>()
            .join("|");
        let combined = format!("{joined}:{}", self.build);

        combined.encode_utf16().fold(FNV_OFFSET, |hash, unit| {
            (hash ^ u64::from(unit)).wrapping_mul(FNV_PRIME)
        })
    }

    /// The wire form a client sends to the host.
    pub fn to_offer(&self, client: PeerId) -> ManifestOffer {
        ManifestOffer {
            client,
            entries: self
                .entries
                .iter()
                .map(|e| OfferedEntry {
                    id: e.id.clone(),
                    version: e.version.clone(),
                })
                .collect(),
            build: self.build.clone(),
            rollup_hash: self.rollup_hash(),
        }
    }

    /// Rebuilds a client manifest from its offer. Titles are unknown on the
    /// host and flags take their defaults.
    pub fn from_offer(offer: &ManifestOffer) -> Self {
        Self {
            entries: offer
                .entries
                .iter()
                .map(|e| ManifestEntry::new(e.id.clone(), e.version.clone()))
                .collect(),
            build: offer.build.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Policy & verdict
// ---------------------------------------------------------------------------

/// Host-side knobs for [`validate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatPolicy {
    /// Reject clients with critical extras.
    pub strict: bool,
    /// Tolerate version drift on every entry.
    pub allow_version_mismatch: bool,
}

/// Outcome of a compatibility check.
///
/// `reason` is the one-line summary; the lists carry the detail a player
/// needs to fix their installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    pub approved: bool,
    pub reason: String,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub mismatched: Vec<String>,
    pub missing_workshop_ids: Vec<u64>,
    /// Log-only notes. Never sent to the client.
    pub warnings: Vec<String>,
}

impl Verdict {
    /// Host-side failure while checking. Degrades to a rejection.
    pub fn error(msg: impl std::fmt::Display) -> Self {
        Self {
            approved: false,
            reason: format!("Verification error: {msg}"),
            ..Self::default()
        }
    }

    /// Approval used when verification is switched off.
    pub fn unchecked() -> Self {
        Self {
            approved: true,
            reason: "Compatible".to_string(),
            ..Self::default()
        }
    }

    pub fn has_issues(&self) -> bool {
        !self.missing.is_empty() || !self.extra.is_empty() || !self.mismatched.is_empty()
    }

    /// Itemized text shown to a rejected player.
    pub fn user_message(&self) -> String {
        let mut out = format!("Mod compatibility check failed:\n{}\n\n", self.reason);
        let sections = [
            ("Missing mods (install these):", &self.missing),
            ("Extra mods (disable these):", &self.extra),
            ("Version mismatches (update these):", &self.mismatched),
        ];
        for (heading, items) in sections {
            if items.is_empty() {
                continue;
            }
            out.push_str(heading);
            out.push('\n');
            for item in items {
                out.push_str("• ");
                out.push_str(item);
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str("Please ensure your mods match the host's configuration.");
        out
    }

    pub fn to_packet(&self, client: PeerId) -> AdmissionVerdict {
        AdmissionVerdict {
            client,
            approved: self.approved,
            reason: self.reason.clone(),
            missing: self.missing.clone(),
            extra: self.extra.clone(),
            mismatched: self.mismatched.clone(),
            missing_workshop_ids: self.missing_workshop_ids.clone(),
        }
    }

    pub fn from_packet(packet: &AdmissionVerdict) -> Self {
        Self {
            approved: packet.approved,
            reason: packet.reason.clone(),
            missing: packet.missing.clone(),
            extra: packet.extra.clone(),
            mismatched: packet.mismatched.clone(),
            missing_workshop_ids: packet.missing_workshop_ids.clone(),
            warnings: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

/// Decides whether `client` may join a host running `host`.
pub fn validate(host: &Manifest, client: &Manifest, policy: CompatPolicy) -> Verdict {
    if host.build != client.build {
        let reason = format!(
            "Game version mismatch: host={}, client={}",
            host.build, client.build
        );
        tracing::info!(%reason, "client rejected");
        return Verdict {
            approved: false,
            reason,
            ..Verdict::default()
        };
    }

    // BTreeMap/BTreeSet keep every derived list sorted and deduplicated.
    let client_by_id: BTreeMap<&str, &ManifestEntry> =
        client.entries.iter().map(|e| (e.id.as_str(), e)).collect();
    let host_by_id: BTreeMap<&str, &ManifestEntry> =
        host.entries.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut missing = BTreeSet::new();
    let mut workshop_ids = BTreeSet::new();
    let mut mismatched = BTreeSet::new();
    let mut extra = BTreeSet::new();
    let mut warnings = Vec::new();

    for (id, host_entry) in &host_by_id {
        match client_by_id.get(id) {
            None if host_entry.required => {
                missing.insert(host_entry.display_name());
                if let Ok(numeric) = id.trim().parse::<u64>() {
                    workshop_ids.insert(numeric);
                }
            }
            None => warnings.push(format!(
                "Optional mod missing: {}",
                host_entry.display_name()
            )),
            Some(client_entry) if client_entry.version != host_entry.version => {
                let detail = format!(
                    "{} (host {}, client {})",
                    host_entry.display_name(),
                    host_entry.version,
                    client_entry.version
                );
                if host_entry.allow_version_mismatch || policy.allow_version_mismatch {
                    warnings.push(format!("Version mismatch (ignored): {detail}"));
                } else {
                    mismatched.insert(detail);
                }
            }
            Some(_) => {}
        }
    }

    for (id, client_entry) in &client_by_id {
        if host_by_id.contains_key(id) {
            continue;
        }
        if client_entry.is_critical() {
            extra.insert(client_entry.display_name());
        } else {
            warnings.push(format!(
                "Non-critical extra mod ignored: {}",
                client_entry.display_name()
            ));
        }
    }

    let reject_extras = policy.strict && !extra.is_empty();
    let approved = missing.is_empty() && mismatched.is_empty() && !reject_extras;

    if approved
        && host.entries.len() == client.entries.len()
        && host.rollup_hash() != client.rollup_hash()
    {
        warnings.push("Mod hash mismatch - possible mod order difference".to_string());
    }

    let reason = if approved {
        if extra.is_empty() {
            "Compatible".to_string()
        } else {
            format!("Compatible (client has {} extra mod(s))", extra.len())
        }
    } else {
        let mut issues = Vec::new();
        if !missing.is_empty() {
            issues.push(format!("{} missing mod(s)", missing.len()));
        }
        if reject_extras {
            issues.push(format!("{} extra mod(s) not allowed", extra.len()));
        }
        if !mismatched.is_empty() {
            issues.push(format!("{} version mismatch(es)", mismatched.len()));
        }
        format!("Mod incompatibility: {}", issues.join(", "))
    };

    for warning in &warnings {
        tracing::debug!(%warning, "compatibility warning");
    }
    tracing::info!(approved, %reason, "compatibility check finished");

    Verdict {
        approved,
        reason,
        missing: missing.into_iter().collect(),
        extra: extra.into_iter().collect(),
        mismatched: mismatched.into_iter().collect(),
        missing_workshop_ids: workshop_ids.into_iter().collect(),
        warnings,
    }
}

/// [`validate`] against an offer straight off the wire.
pub fn validate_offer(host: &Manifest, offer: &ManifestOffer, policy: CompatPolicy) -> Verdict {
    let client = Manifest::from_offer(offer);
    let mut verdict = validate(host, &client, policy);
    if verdict.approved
        && host.entries.len() == client.entries.len()
        && offer.rollup_hash != host.rollup_hash()
        && !verdict.warnings.iter().any(|w| w.starts_with("Mod hash mismatch"))
    {
        verdict
            .warnings
            .push("Mod hash mismatch - possible mod order difference".to_string());
    }
    verdict
}

// =========================================================================
// Tests
// =========================================================================
