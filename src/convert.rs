//! The MDX to `.dictionary` pipeline.
//!
//! Stages run in order: header, key index, records, resources, package. Any
//! failure is terminal; nothing is published until the packager commits.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::bundle::{stage_ddk_project, withdraw, OutputBundle, Packager, PackagingError, DEFAULT_STYLESHEET};
use crate::config::ConvertConfig;
use crate::mdict::{
    ErrorClass, KeyEntry, MdictError, MdictReader, Mdx, RecordData, RecordInfo, ResourcePayload,
    ResourceStore,
};
use crate::transform::{Entry, EntryTransformer, HeadwordNamespace, MarkupAnomaly, TransformedEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Header,
    KeyIndex,
    Records,
    Resources,
    Package,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Header => "header",
            Stage::KeyIndex => "key index",
            Stage::Records => "records",
            Stage::Resources => "resources",
            Stage::Package => "package",
        })
    }
}

impl Stage {
    /// Stage of a failure raised while opening a reader.
    fn of_open_error(err: &MdictError) -> Self {
        match err {
            MdictError::Io(_)
            | MdictError::MalformedHeader(_)
            | MdictError::UnsupportedVersion(_)
            | MdictError::UnknownEncoding(_)
            | MdictError::PasscodeRequired => Stage::Header,
            _ => Stage::KeyIndex,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{stage} stage failed: {source}")]
    Decode {
        stage: Stage,
        #[source]
        source: MdictError,
    },

    #[error("package stage failed: {0}")]
    Packaging(#[from] PackagingError),

    #[error("Failed to read {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConvertError {
    fn decode(stage: Stage) -> impl FnOnce(MdictError) -> Self {
        move |source| ConvertError::Decode { stage, source }
    }

    pub fn stage(&self) -> Stage {
        match self {
            ConvertError::Decode { stage, .. } => *stage,
            ConvertError::Packaging(_) => Stage::Package,
            // Sibling inputs such as the stylesheet are read alongside the MDD resources
            ConvertError::Input { .. } => Stage::Resources,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ConvertError::Decode { source, .. } => source.class(),
            ConvertError::Packaging(_) => ErrorClass::PackagingIo,
            ConvertError::Input { .. } => ErrorClass::Io,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Summary of a finished conversion.
#[derive(Debug, Clone, Default)]
pub struct ConversionReport {
    pub output: PathBuf,
    pub ddk_project: Option<PathBuf>,
    /// Entries written to the body.
    pub entries: usize,
    /// Keys dropped for an empty headword or body.
    pub skipped: usize,
    pub index_slots: usize,
    pub body_bytes: usize,
    pub resources: usize,
    /// `(headword, anomaly)` in source order.
    pub anomalies: Vec<(String, MarkupAnomaly)>,
}

/// Converts one MDX file (plus its MDD volumes) into a dictionary bundle.
pub fn convert(config: &ConvertConfig) -> Result<ConversionReport> {
    let options = config.reader_options();
    let workers = config.effective_workers();
    let destination = config.output_path();

    let reader = MdictReader::<Mdx>::open(&config.input, &options)
        .map_err(|e| ConvertError::Decode { stage: Stage::of_open_error(&e), source: e })?;
    let identity = config.bundle_identity(&reader.header().metadata.title);

    let keys = reader.key_entries().map_err(ConvertError::decode(Stage::KeyIndex))?;
    let locations = reader
        .locate_records(keys)
        .map_err(ConvertError::decode(Stage::Records))?;
    let headwords = HeadwordNamespace::new(
        locations
            .iter()
            .enumerate()
            .map(|(position, (key, _))| (position, key.text.as_str())),
    );
    debug!("Headword namespace: {} distinct headwords", headwords.len());

    let mdd_paths = config.mdd_paths();
    let store = if mdd_paths.is_empty() {
        ResourceStore::empty()
    } else {
        ResourceStore::open(&mdd_paths, &options).map_err(ConvertError::decode(Stage::Resources))?
    };

    info!(
        "Transforming {} entries from {} record blocks with {} worker(s)",
        locations.len(),
        reader.num_record_blocks(),
        workers
    );
    let transformer = EntryTransformer::new(&headwords, store.namespace());
    let (transformed, skipped) = transform_entries(&reader, &locations, transformer, workers)
        .map_err(ConvertError::decode(Stage::Records))?;

    let mut anomalies = Vec::new();
    for entry in transformed.values() {
        for anomaly in &entry.anomalies {
            warn!("Entry {:?}: {}", entry.headword, anomaly);
            anomalies.push((entry.headword.clone(), anomaly.clone()));
        }
    }

    let entries = transformed.len();
    let bundle = OutputBundle::assemble(transformed.into_values().collect())?;
    let css = stylesheet(config)?;

    info!("Packaging {}", destination.display());
    let packager = Packager::create(&destination, config.overwrite)?;
    packager.write_bundle(&bundle)?;
    packager.write_info_plist(&identity)?;
    packager.write_stylesheet(&css)?;
    let resources = write_resources(&store, &packager)?;

    // Both trees are staged before either is published
    let ddk_stage = match &config.ddk_project {
        Some(dir) => Some(stage_ddk_project(dir, &bundle, &identity, &css, config.overwrite)?),
        None => None,
    };
    let output = packager.finish()?;

    let ddk_project = match ddk_stage.map(|stage| stage.commit()).transpose() {
        Ok(project) => project,
        Err(err) => {
            if let Err(cleanup) = withdraw(&output) {
                warn!("{}", cleanup);
            }
            return Err(err.into());
        }
    };

    info!(
        "Converted {} entries ({} skipped, {} anomalies) into {} index slots",
        entries,
        skipped,
        anomalies.len(),
        bundle.index.len()
    );
    Ok(ConversionReport {
        output,
        ddk_project,
        entries,
        skipped,
        index_slots: bundle.index.len(),
        body_bytes: bundle.body.len(),
        resources,
        anomalies,
    })
}

fn stylesheet(config: &ConvertConfig) -> Result<String> {
    match config.sibling_stylesheet() {
        Some(path) => {
            info!("Using stylesheet {}", path.display());
            std::fs::read_to_string(&path).map_err(|source| ConvertError::Input { path, source })
        }
        None => Ok(DEFAULT_STYLESHEET.to_string()),
    }
}

/// Copies every MDD resource into the bundle; aliases are written as copies of their target.
fn write_resources(store: &ResourceStore, packager: &Packager) -> Result<usize> {
    let mut written = 0;
    for entry in store.iter() {
        let entry = entry.map_err(ConvertError::decode(Stage::Resources))?;
        let bytes = match entry.payload {
            ResourcePayload::Bytes(bytes) => bytes,
            ResourcePayload::Alias(target) => {
                match store.read(&target).map_err(ConvertError::decode(Stage::Resources))? {
                    Some(bytes) => bytes,
                    None => {
                        warn!("Resource {} aliases missing {}", entry.path, target);
                        continue;
                    }
                }
            }
        };
        packager.write_resource(&entry.path, &bytes)?;
        written += 1;
    }
    if written > 0 {
        info!("Copied {} resources", written);
    }
    Ok(written)
}

type Transformed = (BTreeMap<usize, TransformedEntry>, usize);

/// Decodes and transforms every entry, one record block per work unit.
///
/// Results are keyed by key position. The first failing block stops all workers.
fn transform_entries(
    reader: &MdictReader<Mdx>,
    locations: &[(KeyEntry, RecordInfo)],
    transformer: EntryTransformer<'_>,
    workers: usize,
) -> crate::mdict::Result<Transformed> {
    let mut by_block: Vec<Vec<usize>> = vec![Vec::new(); reader.num_record_blocks()];
    for (position, (_, info)) in locations.iter().enumerate() {
        by_block[info.block_index].push(position);
    }
    let jobs: Vec<(usize, Vec<usize>)> = by_block
        .into_iter()
        .enumerate()
        .filter(|(_, positions)| !positions.is_empty())
        .collect();

    let cursor = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let failure: Mutex<Option<MdictError>> = Mutex::new(None);

    let (jobs, cursor, stop, failure_ref) = (&jobs, &cursor, &stop, &failure);
    let outputs: Vec<Transformed> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers.min(jobs.len()).max(1))
            .map(|_| {
                scope.spawn(move || {
                    let mut done = BTreeMap::new();
                    let mut skipped = 0;
                    while !stop.load(Ordering::Relaxed) {
                        let Some((block_index, positions)) = jobs.get(cursor.fetch_add(1, Ordering::Relaxed)) else {
                            break;
                        };
                        match transform_block(reader, locations, transformer, *block_index, positions, &mut done) {
                            Ok(n) => skipped += n,
                            Err(e) => {
                                stop.store(true, Ordering::Relaxed);
                                if let Ok(mut slot) = failure_ref.lock() {
                                    slot.get_or_insert(e);
                                }
                                break;
                            }
                        }
                    }
                    (done, skipped)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    if let Some(err) = failure.into_inner().map_err(|_| MdictError::LockPoisoned)? {
        return Err(err);
    }

    let mut all = BTreeMap::new();
    let mut skipped = 0;
    for (done, n) in outputs {
        all.extend(done);
        skipped += n;
    }
    Ok((all, skipped))
}

/// Transforms the entries at `positions`, all stored in one record block. Returns the skip count.
fn transform_block(
    reader: &MdictReader<Mdx>,
    locations: &[(KeyEntry, RecordInfo)],
    transformer: EntryTransformer<'_>,
    block_index: usize,
    positions: &[usize],
    out: &mut BTreeMap<usize, TransformedEntry>,
) -> crate::mdict::Result<usize> {
    let block = reader.record_block(block_index)?;
    trace!("Record block {}: {} entries", block_index, positions.len());

    let mut skipped = 0;
    for &position in positions {
        let (key, info) = &locations[position];
        let body = reader.parse_record(&block, info)?;
        if is_empty_entry(&key.text, &body) {
            debug!("Skipping entry {} ({:?}): empty headword or body", position, key.text);
            skipped += 1;
            continue;
        }
        let entry = Entry {
            position,
            headword: key.text.clone(),
            body,
        };
        out.insert(position, transformer.transform(&entry));
    }
    Ok(skipped)
}

/// Whitespace counts as content; only zero-length headwords and bodies are dropped.
fn is_empty_entry(headword: &str, body: &RecordData<String>) -> bool {
    let body_empty = match body {
        RecordData::Content(html) => html.is_empty(),
        RecordData::Redirect(target) => target.is_empty(),
    };
    headword.is_empty() || body_empty
}
