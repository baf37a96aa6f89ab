use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

use crate::descriptor::{Descriptor, LoadContext, LoadOutcome};
use crate::id::ResId;

/// Raw bytes of one file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileData {
    pub bytes: Vec<u8>,
    pub path: PathBuf,
}

impl FileData {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Reads `root/name` from disk
#[derive(Clone, Debug)]
pub struct FileDescriptor {
    root: PathBuf,
}

impl FileDescriptor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path for `name`, or `None` if it would leave the root.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            None
        } else {
            Some(self.root.join(relative))
        }
    }

    fn read(&self, name: &str) -> Result<(PathBuf, Vec<u8>), LoadOutcome> {
        let Some(path) = self.resolve(name) else {
            warn!(name, root = %self.root.display(), "file name escapes the asset root");
            return Err(LoadOutcome::Fatal);
        };
        match fs::read(&path) {
            Ok(bytes) => Ok((path, bytes)),
            Err(err) => {
                warn!(name, path = %path.display(), %err, "file read failed");
                Err(io_outcome(&err))
            }
        }
    }
}

/// A missing file will not appear by retrying; anything else might.
fn io_outcome(err: &io::Error) -> LoadOutcome {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => LoadOutcome::Fatal,
        _ => LoadOutcome::Retry,
    }
}

impl Descriptor for FileDescriptor {
    type Payload = FileData;

    fn type_name(&self) -> &'static str {
        "file"
    }

    fn construct(&mut self, _cx: &mut LoadContext<'_>, name: &str, _id: ResId, dst: &mut FileData) -> LoadOutcome {
        match self.read(name) {
            Ok((path, bytes)) => {
                *dst = FileData { bytes, path };
                LoadOutcome::Loaded
            }
            Err(outcome) => outcome,
        }
    }

    /// Old bytes survive a failed re-read.
    fn reload(
        &mut self,
        _cx: &mut LoadContext<'_>,
        name: &str,
        _id: ResId,
        dst: &mut FileData,
    ) -> Option<LoadOutcome> {
        Some(match self.read(name) {
            Ok((path, bytes)) => {
                *dst = FileData { bytes, path };
                LoadOutcome::Loaded
            }
            Err(outcome) => outcome,
        })
    }

    fn destroy(&mut self, _cx: &mut LoadContext<'_>, _name: &str, _id: ResId, dst: &mut FileData) {
        *dst = FileData::default();
    }
}
