use std::fs::{self, create_dir_all, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::builder::{BlockFiles, Pass};
use crate::category::CategoryTree;
use crate::collection::CollectionConfig;
use crate::documents::DocumentTable;
use crate::error::Result;

pub const FORMAT_VERSION: u32 = 1;

/// Subdirectory a collection is written into before it replaces the live files.
pub const STAGING_DIR: &str = ".staging";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u32,
    pub num_docs: u32,
    pub created_at: String,
    pub config: CollectionConfig,
}

impl MetaFile {
    pub fn new(num_docs: u32, config: CollectionConfig) -> Self {
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            version: FORMAT_VERSION,
            num_docs,
            created_at,
            config,
        }
    }
}

/// File layout of a collection directory.
#[derive(Debug, Clone)]
pub struct CollectionPaths {
    pub root: PathBuf,
}

impl CollectionPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    /// `{label}-dictionary.txt` and `{label}-index.txt`.
    pub fn pass(&self, pass: Pass) -> BlockFiles {
        BlockFiles::published(&self.root, pass)
    }

    pub fn staging(&self) -> Self {
        Self::new(self.root.join(STAGING_DIR))
    }

    /// Every file of a collection. `meta.json` comes last: a directory
    /// without it is not a collection.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for pass in Pass::ALL {
            let BlockFiles { dictionary, index } = self.pass(pass);
            files.push(dictionary);
            files.push(index);
        }
        files.push(self.documents());
        files.push(self.categories());
        files.push(self.meta());
        files
    }

    fn documents(&self) -> PathBuf { self.root.join("documents.bin") }
    fn categories(&self) -> PathBuf { self.root.join("categories.bin") }
    fn meta(&self) -> PathBuf { self.root.join("meta.json") }
}

pub fn save_documents(paths: &CollectionPaths, documents: &DocumentTable) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.documents())?;
    let bytes = bincode::serialize(documents)?;
    f.write_all(&bytes)?;
    Ok(())
}

pub fn load_documents(paths: &CollectionPaths) -> Result<DocumentTable> {
    let mut f = File::open(paths.documents())?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(bincode::deserialize(&buf)?)
}

pub fn save_categories(paths: &CollectionPaths, categories: &CategoryTree) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.categories())?;
    let bytes = bincode::serialize(categories)?;
    f.write_all(&bytes)?;
    Ok(())
}

pub fn load_categories(paths: &CollectionPaths) -> Result<CategoryTree> {
    let mut f = File::open(paths.categories())?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(bincode::deserialize(&buf)?)
}

pub fn save_meta(paths: &CollectionPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &CollectionPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    Ok(serde_json::from_str(&buf)?)
}

/// Creates an empty staging directory under `paths`, clearing one left by
/// an interrupted build.
pub fn begin_staging(paths: &CollectionPaths) -> Result<CollectionPaths> {
    let staging = paths.staging();
    if staging.root.exists() {
        warn!(dir = %staging.root.display(), "removing stale staging directory");
        fs::remove_dir_all(&staging.root)?;
    }
    create_dir_all(&staging.root)?;
    Ok(staging)
}

/// Moves a fully written staged collection over `target`.
///
/// The old `meta.json` is removed before anything else moves and the new one
/// is moved last, so an interrupted publish never loads as a collection.
pub fn publish(staging: &CollectionPaths, target: &CollectionPaths) -> Result<()> {
    let staged = staging.files();
    if let Some(missing) = staged.iter().find(|p| !p.exists()) {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("staged collection is missing {}", missing.display()),
        )
        .into());
    }
    match fs::remove_file(target.meta()) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err.into()),
        _ => {}
    }
    for (from, to) in staged.iter().zip(target.files()) {
        fs::rename(from, &to)?;
    }
    discard(staging);
    debug!(dir = %target.root.display(), "published collection");
    Ok(())
}

/// Removes a staging directory and everything in it.
pub fn discard(staging: &CollectionPaths) {
    if let Err(err) = fs::remove_dir_all(&staging.root) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(dir = %staging.root.display(), %err, "could not remove staging directory");
        }
    }
}
