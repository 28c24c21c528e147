//! Conversion settings.
//!
//! [`ConvertConfig`] collects every knob of one conversion in one place. The
//! CLI fills it from arguments (and environment fallbacks); library callers
//! start from [`ConvertConfig::new`] and adjust fields with the `with_*`
//! methods.

use std::path::PathBuf;

use crate::bundle::BundleIdentity;
use crate::mdict::resources::sibling_volumes;
use crate::mdict::ReaderOptions;

/// Where MDD resource volumes come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MddSource {
    /// `stem.mdd`, `stem.1.mdd`, ... next to the MDX file.
    Siblings,
    Explicit(Vec<PathBuf>),
    Disabled,
}

/// Identity fields supplied by the caller. Unset fields fall back to values
/// derived from the input file and the dictionary header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityOverrides {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub identifier: Option<String>,
    pub version: Option<String>,
    pub copyright: Option<String>,
    pub manufacturer: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ConvertConfig {
    pub input: PathBuf,

    /// Bundle destination. `None` means `<stem>.dictionary` next to the input.
    pub output: Option<PathBuf>,

    pub mdd: MddSource,

    pub identity: IdentityOverrides,

    /// `(regcode_hex, user_email)` for dictionaries with encrypted record blocks.
    pub passcode: Option<(String, String)>,

    /// Overrides the header encoding of v1/v2 dictionaries.
    pub encoding: Option<String>,

    /// Apply the header `StyleSheet` to entries (default true).
    pub substitute_styles: bool,

    /// Worker threads for record decoding. Default: available parallelism.
    pub workers: usize,

    /// Decoded record blocks kept in memory. `None` means twice the worker count.
    pub cache_blocks: Option<usize>,

    /// Replace an existing destination.
    pub overwrite: bool,

    /// Also write a Dictionary Development Kit source project here.
    pub ddk_project: Option<PathBuf>,
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl ConvertConfig {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            mdd: MddSource::Siblings,
            identity: IdentityOverrides::default(),
            passcode: None,
            encoding: None,
            substitute_styles: true,
            workers: default_workers(),
            cache_blocks: None,
            overwrite: false,
            ddk_project: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_mdd(mut self, mdd: MddSource) -> Self {
        self.mdd = mdd;
        self
    }

    pub fn with_identity(mut self, identity: IdentityOverrides) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_ddk_project(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ddk_project = Some(dir.into());
        self
    }

    /// `reg_code_hex` is the hex registration code issued for `email`.
    pub fn with_passcode(mut self, reg_code_hex: impl Into<String>, email: impl Into<String>) -> Self {
        self.passcode = Some((reg_code_hex.into(), email.into()));
        self
    }

    fn stem(&self) -> String {
        self.input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Dictionary".to_string())
    }

    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => self.input.with_file_name(format!("{}.dictionary", self.stem())),
        }
    }

    pub fn mdd_paths(&self) -> Vec<PathBuf> {
        match &self.mdd {
            MddSource::Siblings => sibling_volumes(&self.input),
            MddSource::Explicit(paths) => paths.clone(),
            MddSource::Disabled => Vec::new(),
        }
    }

    /// `stem.css` next to the input, if present.
    pub fn sibling_stylesheet(&self) -> Option<PathBuf> {
        let path = self.input.with_extension("css");
        path.is_file().then_some(path)
    }

    pub fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            passcode: self.passcode.clone(),
            encoding_override: self.encoding.clone(),
            substitute_styles: self.substitute_styles,
            cache_blocks: self
                .cache_blocks
                .unwrap_or(self.effective_workers() * 2)
                .max(1),
        }
    }

    /// Resolves the bundle identity; `title` is the dictionary header title.
    pub fn bundle_identity(&self, title: &str) -> BundleIdentity {
        let overrides = &self.identity;
        let name = overrides.name.clone().unwrap_or_else(|| self.stem());
        let mut identity = BundleIdentity::for_name(&name);

        let title = title.trim();
        identity.display_name = match &overrides.display_name {
            Some(display_name) => display_name.clone(),
            None if !title.is_empty() => title.to_string(),
            None => name,
        };
        if let Some(identifier) = &overrides.identifier {
            identity.identifier = identifier.clone();
        }
        if let Some(version) = &overrides.version {
            identity.version = version.clone();
        }
        if let Some(copyright) = &overrides.copyright {
            identity.copyright = copyright.clone();
        }
        if let Some(manufacturer) = &overrides.manufacturer {
            identity.manufacturer = manufacturer.clone();
        }
        identity
    }
}
