//! Certificate index.
//!
//! The [`CertIndex`] maps the SHA-256 fingerprint of a signed key to every
//! certificate in the key files that was issued over it.  It is built once at
//! startup from the parsed key files and never modified afterwards, so the
//! agent sessions share it through a plain `Arc` with no lock.

use std::collections::HashMap;

use ssh_key::HashAlg;
use ssh_key::public::KeyData;
use tracing::debug;

use crate::keyfile::{CertEntry, KeyRecord};

/// SHA-256 fingerprint string (e.g. `"SHA256:abc123…"`) of `key`.
pub fn fingerprint(key: &KeyData) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

/// Certificates grouped by the fingerprint of the key they certify.
///
/// Within one fingerprint, certificates keep the order they were read in.
/// Duplicates are kept as-is.
#[derive(Debug, Default)]
pub struct CertIndex {
    entries: HashMap<String, Vec<CertEntry>>,
}

impl CertIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from parsed key file records, ignoring plain keys.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a KeyRecord>) -> Self {
        records
            .into_iter()
            .filter_map(KeyRecord::as_certificate)
            .cloned()
            .collect()
    }

    /// Append a certificate under its signed key's fingerprint.
    fn insert(&mut self, entry: CertEntry) {
        let fingerprint = entry.signed_key_fingerprint();
        debug!(
            fingerprint = %fingerprint,
            key_id = %entry.key_id,
            algorithm = %entry.algorithm,
            "cert index: adding certificate"
        );
        self.entries.entry(fingerprint).or_default().push(entry);
    }

    /// Certificates issued over the key with this fingerprint.
    pub fn get(&self, fingerprint: &str) -> &[CertEntry] {
        self.entries.get(fingerprint).map(Vec::as_slice).unwrap_or_default()
    }

    /// Total number of certificates (including duplicates).
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Number of distinct signed keys.
    pub fn fingerprint_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<CertEntry> for CertIndex {
    fn from_iter<I: IntoIterator<Item = CertEntry>>(iter: I) -> Self {
        let mut index = Self::new();
        for entry in iter {
            index.insert(entry);
        }
        index
    }
}
