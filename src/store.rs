use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

use crate::codec::Codecs;
use crate::domain::Timecourse;
use crate::error::ExpdbError;
use crate::format::{Payload, PayloadFormat, Representation};
use crate::tool::run_cmd;

/// `{study}/{subject}/{MODALITY}/{TYPE}/{YYYYmmdd_HHMMSS}.{ext}`
pub fn canonical_path(timecourse: &Timecourse, format: PayloadFormat) -> String {
    format!(
        "{}/{}/{}/{}/{}.{}",
        timecourse.study.name,
        timecourse.subject.code,
        timecourse.data.modality(),
        timecourse.data.data_type(),
        timecourse.date_collected.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Moves encoded files between local disk and a durable location.
pub trait Backend: Send + Sync {
    /// Locator recorded as a timecourse's `path` for a canonical path.
    fn uri_for(&self, canonical: &str) -> String;

    fn upload(&self, local: &Utf8Path, uri: &str) -> Result<(), ExpdbError>;

    fn download(&self, uri: &str, local: &Utf8Path) -> Result<(), ExpdbError>;
}

/// Files live under the storage root, which doubles as the cache directory,
/// so transport is a no-op.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

impl Backend for LocalBackend {
    fn uri_for(&self, canonical: &str) -> String {
        canonical.to_string()
    }

    fn upload(&self, _local: &Utf8Path, _uri: &str) -> Result<(), ExpdbError> {
        Ok(())
    }

    fn download(&self, _uri: &str, _local: &Utf8Path) -> Result<(), ExpdbError> {
        Ok(())
    }
}

fn bucket_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9+.-]*://[A-Za-z0-9_-]+/?$").expect("valid bucket regex")
    })
}

/// Remote bucket reached through an external copy command
/// (`gcloud storage cp <src> <dst>` unless overridden).
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    prefix: String,
    copy_command: Vec<String>,
}

impl ObjectStoreBackend {
    pub fn new(bucket: &str) -> Result<Self, ExpdbError> {
        if !bucket_pattern().is_match(bucket) {
            return Err(ExpdbError::InvalidBucketFormat(bucket.to_string()));
        }
        Ok(Self {
            prefix: bucket.trim_end_matches('/').to_string(),
            copy_command: vec![
                "gcloud".to_string(),
                "storage".to_string(),
                "cp".to_string(),
            ],
        })
    }

    /// Replaces the copy command; source and destination are appended.
    pub fn with_copy_command(mut self, command: Vec<String>) -> Result<Self, ExpdbError> {
        if command.is_empty() {
            return Err(ExpdbError::Validation("copy command is empty".to_string()));
        }
        self.copy_command = command;
        Ok(self)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full argv for copying `source` to `destination`.
    pub fn copy_argv(&self, source: &str, destination: &str) -> Vec<String> {
        let mut argv = self.copy_command.clone();
        argv.push(source.to_string());
        argv.push(destination.to_string());
        argv
    }

    fn copy(&self, source: &str, destination: &str, uri: &str) -> Result<(), ExpdbError> {
        let argv = self.copy_argv(source, destination);
        let (program, args) = argv.split_first().ok_or_else(|| {
            ExpdbError::Validation("copy command is empty".to_string())
        })?;
        debug!(command = %argv.join(" "), "copying");
        run_cmd(Path::new(program), args, None)
            .map(|_| ())
            .map_err(|message| {
                warn!(%uri, %message, "transport failed");
                ExpdbError::Transport {
                    uri: uri.to_string(),
                    message,
                }
            })
    }
}

impl Backend for ObjectStoreBackend {
    fn uri_for(&self, canonical: &str) -> String {
        format!("{}/{canonical}", self.prefix)
    }

    fn upload(&self, local: &Utf8Path, uri: &str) -> Result<(), ExpdbError> {
        self.copy(local.as_str(), uri, uri)
    }

    fn download(&self, uri: &str, local: &Utf8Path) -> Result<(), ExpdbError> {
        self.copy(uri, local.as_str(), uri)
    }
}

/// Encodes payloads through the codecs and moves them through a backend,
/// optionally keeping a local copy under `cache_dir`.
pub struct StorageManager {
    backend: Box<dyn Backend>,
    cache_dir: Option<Utf8PathBuf>,
    codecs: Codecs,
}

impl StorageManager {
    pub fn new(backend: Box<dyn Backend>, cache_dir: Option<Utf8PathBuf>, codecs: Codecs) -> Self {
        Self {
            backend,
            cache_dir,
            codecs,
        }
    }

    /// Storage rooted at a local directory.
    pub fn local(root: impl Into<Utf8PathBuf>, codecs: Codecs) -> Self {
        Self::new(Box::new(LocalBackend), Some(root.into()), codecs)
    }

    pub fn cache_dir(&self) -> Option<&Utf8Path> {
        self.cache_dir.as_deref()
    }

    pub fn codecs(&self) -> &Codecs {
        &self.codecs
    }

    pub fn canonical_path_for(
        &self,
        timecourse: &Timecourse,
        representation: Representation,
    ) -> Result<String, ExpdbError> {
        let format = PayloadFormat::resolve(timecourse.data.data_type(), representation)?;
        Ok(canonical_path(timecourse, format))
    }

    pub fn uri_for(&self, timecourse: &Timecourse, payload: &Payload) -> Result<String, ExpdbError> {
        let canonical = self.canonical_path_for(timecourse, payload.representation())?;
        Ok(self.backend.uri_for(&canonical))
    }

    /// Encodes `payload` and uploads it to `timecourse.path`.
    pub fn store(&self, timecourse: &Timecourse, payload: &Payload) -> Result<(), ExpdbError> {
        let format = PayloadFormat::resolve(timecourse.data.data_type(), payload.representation())?;
        match &self.cache_dir {
            Some(cache_dir) => {
                let local = cache_dir.join(canonical_path(timecourse, format));
                let parent = ensure_parent(&local)?;
                let staged = staging_file(format, parent)?;
                self.codecs.encode(format, payload, utf8_path(staged.path())?)?;
                staged
                    .persist(&local)
                    .map_err(|err| ExpdbError::Filesystem(err.to_string()))?;
                self.backend.upload(&local, &timecourse.path)
            }
            None => {
                let scratch = scratch_file(format)?;
                let local = utf8_path(scratch.path())?;
                self.codecs.encode(format, payload, local)?;
                self.backend.upload(local, &timecourse.path)
            }
        }
    }

    /// Loads the payload behind `timecourse.path`, preferring a cached copy.
    pub fn retrieve(&self, timecourse: &Timecourse) -> Result<Payload, ExpdbError> {
        let format = PayloadFormat::from_path(&timecourse.path)?;
        match &self.cache_dir {
            Some(cache_dir) => {
                let local = cache_dir.join(canonical_path(timecourse, format));
                if local.exists() {
                    debug!(path = %local, "cache hit");
                } else {
                    let parent = ensure_parent(&local)?;
                    let staging = Builder::new()
                        .prefix(".expdb-")
                        .tempdir_in(parent)
                        .map_err(|err| ExpdbError::Filesystem(err.to_string()))?;
                    let staged = utf8_path(staging.path())?
                        .join(local.file_name().unwrap_or("payload"));
                    self.backend.download(&timecourse.path, &staged)?;
                    if !staged.exists() {
                        return Err(ExpdbError::NotFound(format!(
                            "payload for timecourse {} at {}",
                            timecourse.id, timecourse.path
                        )));
                    }
                    fs::rename(&staged, &local)
                        .map_err(|err| ExpdbError::Filesystem(err.to_string()))?;
                }
                self.codecs.decode(format, &local)
            }
            None => {
                let scratch = scratch_file(format)?;
                let local = utf8_path(scratch.path())?;
                self.backend.download(&timecourse.path, local)?;
                self.codecs.decode(format, local)
            }
        }
    }
}

fn scratch_file(format: PayloadFormat) -> Result<NamedTempFile, ExpdbError> {
    Builder::new()
        .prefix("expdb-")
        .suffix(&format!(".{}", format.extension()))
        .tempfile()
        .map_err(|err| ExpdbError::Filesystem(err.to_string()))
}

/// Sibling of the cache entry, so `persist` is a same-directory rename.
fn staging_file(format: PayloadFormat, dir: &Utf8Path) -> Result<NamedTempFile, ExpdbError> {
    Builder::new()
        .prefix(".expdb-")
        .suffix(&format!(".{}", format.extension()))
        .tempfile_in(dir)
        .map_err(|err| ExpdbError::Filesystem(err.to_string()))
}

fn utf8_path(path: &Path) -> Result<&Utf8Path, ExpdbError> {
    Utf8Path::from_path(path)
        .ok_or_else(|| ExpdbError::Filesystem(format!("non UTF-8 path: {}", path.display())))
}

fn ensure_parent(path: &Utf8Path) -> Result<&Utf8Path, ExpdbError> {
    let parent = path
        .parent()
        .ok_or_else(|| ExpdbError::Filesystem(format!("no parent directory for {path}")))?;
    fs::create_dir_all(parent).map_err(|err| ExpdbError::Filesystem(err.to_string()))?;
    Ok(parent)
}
