//! Writes bundles and DDK projects through a staging directory.
//!
//! Everything is written into a hidden temporary directory next to the
//! destination, which is renamed into place only once every file is on disk.
//! Dropping a stage before [`StagedDir::commit`] removes it, so a failed or
//! interrupted conversion leaves no usable output behind.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::TempDir;

use super::{index, plist, BundleIdentity, OutputBundle, PackagingError, Result};
use crate::mdict::resources::normalize_resource_path;
use crate::transform::MEDIA_DIR;

const STAGING_PREFIX: &str = ".mdict-bundle-";

/// A directory being built next to its final destination.
#[derive(Debug)]
pub struct StagedDir {
    staging: TempDir,
    destination: PathBuf,
    overwrite: bool,
}

impl StagedDir {
    pub fn create(destination: &Path, overwrite: bool) -> Result<Self> {
        if destination.exists() && !overwrite {
            return Err(PackagingError::DestinationExists(destination.to_path_buf()));
        }
        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(PackagingError::io("create directory", &parent))?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
            .map_err(PackagingError::io("create staging directory in", &parent))?;
        debug!("Staging {} in {}", destination.display(), staging.path().display());

        Ok(Self {
            staging,
            destination: destination.to_path_buf(),
            overwrite,
        })
    }

    /// Writes `bytes` to `relative`, creating parent directories.
    pub fn write_file(&self, relative: &Path, bytes: &[u8]) -> Result<()> {
        let path = self.staging.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(PackagingError::io("create directory", parent))?;
        }
        fs::write(&path, bytes).map_err(PackagingError::io("write", &path))
    }

    /// Moves the staged directory to its destination, replacing an existing one when allowed.
    pub fn commit(self) -> Result<PathBuf> {
        if self.destination.exists() {
            if !self.overwrite {
                return Err(PackagingError::DestinationExists(self.destination));
            }
            info!("Replacing existing {}", self.destination.display());
            let removed = if self.destination.is_dir() {
                fs::remove_dir_all(&self.destination)
            } else {
                fs::remove_file(&self.destination)
            };
            removed.map_err(PackagingError::io("remove", &self.destination))?;
        }

        fs::rename(self.staging.path(), &self.destination)
            .map_err(PackagingError::io("move staged output to", &self.destination))?;
        // The TempDir now points at a path that no longer exists; dropping it is a no-op.
        Ok(self.destination)
    }
}

/// Builds a `<Name>.dictionary` bundle.
#[derive(Debug)]
pub struct Packager {
    stage: StagedDir,
}

impl Packager {
    pub fn create(destination: &Path, overwrite: bool) -> Result<Self> {
        Ok(Self {
            stage: StagedDir::create(destination, overwrite)?,
        })
    }

    fn resources_dir() -> PathBuf {
        Path::new("Contents").join("Resources")
    }

    /// Writes `Body.data` and `KeyText.index`.
    pub fn write_bundle(&self, bundle: &OutputBundle) -> Result<()> {
        let resources = Self::resources_dir();
        self.stage.write_file(&resources.join("Body.data"), &bundle.body)?;
        self.stage
            .write_file(&resources.join("KeyText.index"), &index::encode(bundle)?)?;
        debug!(
            "Wrote body ({} bytes) and index ({} entries)",
            bundle.body.len(),
            bundle.index.len()
        );
        Ok(())
    }

    pub fn write_info_plist(&self, identity: &BundleIdentity) -> Result<()> {
        let xml = plist::render(&plist::info_entries(identity))?;
        self.stage.write_file(&Path::new("Contents").join("Info.plist"), &xml)
    }

    pub fn write_stylesheet(&self, css: &str) -> Result<()> {
        self.stage
            .write_file(&Self::resources_dir().join("DefaultStyle.css"), css.as_bytes())
    }

    /// Writes one resource under `media/` at its canonical path.
    pub fn write_resource(&self, canonical: &str, bytes: &[u8]) -> Result<()> {
        let checked = normalize_resource_path(canonical)
            .ok()
            .filter(|normalized| normalized == canonical)
            .ok_or_else(|| PackagingError::InvalidResourcePath(canonical.to_string()))?;
        let mut relative = Self::resources_dir().join(MEDIA_DIR);
        relative.extend(checked.split('/'));
        self.stage.write_file(&relative, bytes)
    }

    /// Publishes the bundle at its destination.
    pub fn finish(self) -> Result<PathBuf> {
        let destination = self.stage.commit()?;
        info!("Bundle written to {}", destination.display());
        Ok(destination)
    }
}

/// Removes a bundle published by [`Packager::finish`] when a later step fails.
pub fn withdraw(published: &Path) -> Result<()> {
    warn!("Removing {}", published.display());
    fs::remove_dir_all(published).map_err(PackagingError::io("remove", published))
}

const DICTIONARY_XML_HEAD: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<d:dictionary xmlns=\"http://www.w3.org/1999/xhtml\" \
xmlns:d=\"http://www.apple.com/DTDs/DictionaryService-1.0.rng\">\n\n";

const DICTIONARY_XML_TAIL: &str = "</d:dictionary>\n";

fn makefile(name: &str) -> String {
    format!(
        "# Build with the Dictionary Development Kit\n\
         \n\
         DICT_NAME = {name}\n\
         DICT_BUILD_TOOL_DIR = /Applications/Utilities/Dictionary\\ Development\\ Kit\n\
         DICT_BUILD_TOOL_BIN = $(DICT_BUILD_TOOL_DIR)/bin\n\
         \n\
         build:\n\
         \t$(DICT_BUILD_TOOL_BIN)/build_dict.sh \"$(DICT_NAME)\" Dictionary.xml Dictionary.css DictInfo.plist\n\
         \n\
         install: build\n\
         \tmkdir -p ~/Library/Dictionaries\n\
         \tcp -R \"objects/$(DICT_NAME).dictionary\" ~/Library/Dictionaries/\n\
         \n\
         clean:\n\
         \trm -rf objects\n\
         \n\
         .PHONY: build install clean\n",
        name = name.replace(' ', "\\ ")
    )
}

/// Stages a Dictionary Development Kit source project for `destination`.
///
/// `Dictionary.xml` holds the already sorted entry fragments of `bundle`.
/// Nothing appears at `destination` until the returned stage is committed.
pub fn stage_ddk_project(
    destination: &Path,
    bundle: &OutputBundle,
    identity: &BundleIdentity,
    css: &str,
    overwrite: bool,
) -> Result<StagedDir> {
    let stage = StagedDir::create(destination, overwrite)?;

    let mut xml = Vec::with_capacity(DICTIONARY_XML_HEAD.len() + bundle.body.len() + DICTIONARY_XML_TAIL.len());
    xml.extend_from_slice(DICTIONARY_XML_HEAD.as_bytes());
    xml.extend_from_slice(&bundle.body);
    xml.extend_from_slice(DICTIONARY_XML_TAIL.as_bytes());

    stage.write_file(Path::new("Dictionary.xml"), &xml)?;
    stage.write_file(Path::new("DictInfo.plist"), &plist::render(&plist::info_entries(identity))?)?;
    stage.write_file(Path::new("Dictionary.css"), css.as_bytes())?;
    stage.write_file(Path::new("Makefile"), makefile(&identity.name).as_bytes())?;
    debug!("DDK project staged for {}", destination.display());
    Ok(stage)
}
