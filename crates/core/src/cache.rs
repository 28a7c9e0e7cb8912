//! Fingerprinting of resolved source files and a single-snapshot load cache.

use std::fmt;
use std::fs;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tracing::debug;

use crate::catalog::{CatalogLoad, CsvCatalog, SourceResolution};
use crate::table::TableKind;

/// Digest over which source file each table resolved to, plus its size and
/// modification time. Any edit, rename or new candidate changes it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceFingerprint(String);

impl SourceFingerprint {
    pub fn of(resolutions: &[(TableKind, SourceResolution)]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for (kind, resolution) in resolutions {
            hasher.update(kind.as_str().as_bytes());
            match resolution {
                SourceResolution::Present(path) => {
                    hasher.update(b"\x01");
                    hasher.update(path.to_string_lossy().as_bytes());
                    let (len, modified) = fs::metadata(path)
                        .map(|metadata| {
                            let modified = metadata
                                .modified()
                                .ok()
                                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                                .map(|elapsed| elapsed.as_nanos())
                                .unwrap_or_default();
                            (metadata.len(), modified)
                        })
                        .unwrap_or_default();
                    hasher.update(&len.to_le_bytes());
                    hasher.update(&modified.to_le_bytes());
                }
                SourceResolution::Absent { .. } => {
                    hasher.update(b"\x00");
                }
            }
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-owned memo of the latest catalog load, keyed by [`SourceFingerprint`].
///
/// Only the current snapshot is kept: a load under a new fingerprint replaces the
/// previous one. One cache should serve one catalog configuration; the schema
/// mapping is not part of the key.
#[derive(Debug, Default)]
pub struct TableSetCache {
    current: Option<(SourceFingerprint, Arc<CatalogLoad>)>,
    loads: usize,
}

impl TableSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached load for the catalog's current sources, loading on a miss.
    pub fn get_or_load(&mut self, catalog: &CsvCatalog) -> Arc<CatalogLoad> {
        let fingerprint = SourceFingerprint::of(&catalog.resolve_all());
        if let Some((cached, hit)) = &self.current {
            if *cached == fingerprint {
                debug!(
                    event_name = "pulseboard.cache.hit",
                    fingerprint = %fingerprint,
                    "reusing loaded tables"
                );
                return Arc::clone(hit);
            }
        }

        let load = Arc::new(catalog.load());
        self.loads += 1;
        debug!(
            event_name = "pulseboard.cache.miss",
            fingerprint = %fingerprint,
            replaced = self.current.is_some(),
            "tables loaded"
        );
        self.current = Some((fingerprint, Arc::clone(&load)));
        load
    }

    /// Drops the snapshot if it was taken under `fingerprint`.
    pub fn invalidate(&mut self, fingerprint: &SourceFingerprint) -> bool {
        let matches = self.fingerprint() == Some(fingerprint);
        if matches {
            self.current = None;
        }
        matches
    }

    /// Fingerprint of the cached snapshot, if any.
    pub fn fingerprint(&self) -> Option<&SourceFingerprint> {
        self.current.as_ref().map(|(fingerprint, _)| fingerprint)
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// How many times a catalog load actually ran.
    pub fn loads(&self) -> usize {
        self.loads
    }
}
