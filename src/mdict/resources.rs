//! Resource lookup over one or more MDD volumes.
//!
//! MDD keys are Windows-style paths (`\images\a.png`). They are normalized
//! into canonical relative paths (`images/a.png`) that the transformer links
//! to and the packager writes under `media/`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::reader::{MdictReader, ReaderOptions};
use super::types::error::{MdictError, Result};
use super::types::filetypes::Mdd;
use super::types::models::{RecordData, RecordInfo};

/// Alias chains longer than this are treated as cycles.
const MAX_ALIAS_DEPTH: usize = 8;

/// Turns an MDD key or an HTML resource reference into a canonical relative path.
///
/// Backslashes become `/`, empty and `.` components are dropped, and any
/// `..` component is rejected.
pub fn normalize_resource_path(raw: &str) -> Result<String> {
    let mut parts = Vec::new();
    for part in raw.trim().split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(MdictError::InvalidFormat(format!(
                    "Resource path escapes the resource root: {:?}",
                    raw
                )))
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(MdictError::InvalidFormat(format!("Empty resource path: {:?}", raw)));
    }
    Ok(parts.join("/"))
}

/// Lists `stem.mdd`, `stem.1.mdd`, `stem.2.mdd`, ... next to `mdx_path`, stopping at the first gap.
pub fn sibling_volumes(mdx_path: &Path) -> Vec<PathBuf> {
    let Some(stem) = mdx_path.file_stem().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    let dir = mdx_path.parent().unwrap_or_else(|| Path::new(""));

    let mut volumes = Vec::new();
    let first = dir.join(format!("{}.mdd", stem));
    if !first.is_file() {
        return volumes;
    }
    volumes.push(first);
    for n in 1.. {
        let next = dir.join(format!("{}.{}.mdd", stem, n));
        if !next.is_file() {
            break;
        }
        volumes.push(next);
    }
    volumes
}

/// Case-insensitive view of the canonical resource paths.
#[derive(Debug, Clone, Default)]
pub struct ResourceNamespace {
    by_folded: HashMap<String, String>,
}

impl ResourceNamespace {
    pub fn insert(&mut self, canonical: &str) {
        self.by_folded
            .entry(canonical.to_lowercase())
            .or_insert_with(|| canonical.to_string());
    }

    /// Resolves a reference as written in entry markup to its canonical path.
    pub fn resolve(&self, reference: &str) -> Option<&str> {
        let normalized = normalize_resource_path(reference).ok()?;
        self.by_folded.get(&normalized.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_folded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_folded.is_empty()
    }
}

/// A resource payload: the stored bytes, or an alias of another canonical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePayload {
    Bytes(Vec<u8>),
    Alias(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub path: String,
    pub payload: ResourcePayload,
}

#[derive(Debug, Clone, Copy)]
struct ResourceLocation {
    volume: usize,
    record: RecordInfo,
}

/// Read access to the resources of all MDD volumes of a dictionary.
#[derive(Debug)]
pub struct ResourceStore {
    volumes: Vec<MdictReader<Mdd>>,
    locations: BTreeMap<String, ResourceLocation>,
    namespace: ResourceNamespace,
}

impl ResourceStore {
    /// An empty store for dictionaries without MDD files.
    pub fn empty() -> Self {
        Self {
            volumes: Vec::new(),
            locations: BTreeMap::new(),
            namespace: ResourceNamespace::default(),
        }
    }

    /// Opens every volume and indexes its keys. Earlier volumes win on duplicate paths.
    pub fn open<P: AsRef<Path>>(paths: &[P], options: &ReaderOptions) -> Result<Self> {
        let mut store = Self::empty();
        for path in paths {
            let path = path.as_ref();
            let reader = MdictReader::<Mdd>::open(path, options)?;
            let volume = store.volumes.len();

            for (entry, record) in reader.entry_locations()? {
                let canonical = match normalize_resource_path(&entry.text) {
                    Ok(canonical) => canonical,
                    Err(e) => {
                        warn!("Skipping resource in {}: {}", path.display(), e);
                        continue;
                    }
                };
                if store.namespace.resolve(&canonical).is_some() {
                    debug!("Duplicate resource {} in {}, keeping first", canonical, path.display());
                    continue;
                }
                store.namespace.insert(&canonical);
                store.locations.insert(canonical, ResourceLocation { volume, record });
            }
            store.volumes.push(reader);
        }
        info!(
            "Resource store ready: {} resources in {} volume(s)",
            store.locations.len(),
            store.volumes.len()
        );
        Ok(store)
    }

    pub fn namespace(&self) -> &ResourceNamespace {
        &self.namespace
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    fn load(&self, canonical: &str, location: ResourceLocation) -> Result<ResourceEntry> {
        let reader = self.volumes.get(location.volume).ok_or_else(|| {
            MdictError::InvalidFormat(format!("Unknown resource volume {}", location.volume))
        })?;
        let payload = match reader.read_record(&location.record)? {
            RecordData::Content(bytes) => ResourcePayload::Bytes(bytes),
            RecordData::Redirect(target) => ResourcePayload::Alias(normalize_resource_path(&target)?),
        };
        Ok(ResourceEntry {
            path: canonical.to_string(),
            payload,
        })
    }

    /// Returns the bytes stored under `canonical`, following aliases.
    ///
    /// `Ok(None)` when the path, or the end of its alias chain, is unknown.
    pub fn read(&self, canonical: &str) -> Result<Option<Vec<u8>>> {
        let mut path = canonical.to_string();
        for _ in 0..MAX_ALIAS_DEPTH {
            let Some(resolved) = self.namespace.resolve(&path) else {
                return Ok(None);
            };
            let Some(&location) = self.locations.get(resolved) else {
                return Ok(None);
            };
            match self.load(resolved, location)?.payload {
                ResourcePayload::Bytes(bytes) => return Ok(Some(bytes)),
                ResourcePayload::Alias(target) => path = target,
            }
        }
        warn!("Resource alias chain too long starting at {}", canonical);
        Ok(None)
    }

    /// Streams every resource in canonical path order.
    pub fn iter(&self) -> impl Iterator<Item = Result<ResourceEntry>> + '_ {
        self.locations
            .iter()
            .map(|(canonical, location)| self.load(canonical, *location))
    }
}
