//! Request-scoped working directories.
//!
//! Layout under the workspace root:
//!
//! ```text
//! <root>/<request-id>/input/<upload name>
//! <root>/<request-id>/stems/<track>.wav
//! ```
//!
//! Each request owns its directory exclusively. Removal of finished requests
//! is left to [`Workspace::sweep`], which the server runs on a timer when a
//! retention period is configured. A request stays registered as in flight
//! until its [`RequestDir`] is dropped, and the sweep never touches those.

use std::{
    collections::HashSet,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime},
};

use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{Result, StemError},
    types::Upload,
};

const INPUT_DIR: &str = "input";
const OUTPUT_DIR: &str = "stems";

type ActiveSet = Arc<Mutex<HashSet<String>>>;

/// Clones share the same set of in-flight requests.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
    active: ActiveSet,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            active: Arc::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create_request(&self) -> Result<RequestDir> {
        let id = Uuid::new_v4().to_string();
        // registered before the directory exists so a concurrent sweep never sees it unowned
        lock(&self.active).insert(id.clone());

        let root = self.root.join(&id);
        let request = RequestDir {
            input_dir: root.join(INPUT_DIR),
            output_dir: root.join(OUTPUT_DIR),
            id,
            root,
            active: self.active.clone(),
        };
        fs::create_dir_all(&request.input_dir)?;
        fs::create_dir_all(&request.output_dir)?;
        debug!(request_id = %request.id, "request workspace created");
        Ok(request)
    }

    pub fn is_active(&self, request_id: &str) -> bool {
        lock(&self.active).contains(request_id)
    }

    /// Path of a produced file, or `None` if either segment is not a plain name.
    pub fn output_file(&self, request_id: &str, file_name: &str) -> Option<PathBuf> {
        if Uuid::parse_str(request_id).is_err() || !is_plain_name(file_name) {
            return None;
        }
        Some(self.root.join(request_id).join(OUTPUT_DIR).join(file_name))
    }

    /// Removes finished request directories whose newest file is older than
    /// `max_age`. In-flight requests are skipped whatever their age.
    pub fn sweep(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if self.is_active(&name.to_string_lossy()) {
                continue;
            }
            let modified = match newest_mtime(&path) {
                Ok(t) => t,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < max_age {
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to sweep request dir"),
            }
        }
        Ok(removed)
    }
}

fn lock(active: &ActiveSet) -> std::sync::MutexGuard<'_, HashSet<String>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Latest modification time of `dir` or anything below it.
fn newest_mtime(dir: &Path) -> io::Result<SystemTime> {
    let mut newest = fs::metadata(dir)?.modified()?;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let modified = match entry.file_type()? {
            t if t.is_dir() => newest_mtime(&entry.path()),
            _ => entry.metadata().and_then(|m| m.modified()),
        };
        match modified {
            Ok(t) => newest = newest.max(t),
            // removed while we were walking
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(newest)
}

#[derive(Debug)]
pub struct RequestDir {
    id: String,
    root: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
    active: ActiveSet,
}

impl RequestDir {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn output_path(&self, track: &str, ext: &str) -> PathBuf {
        self.output_dir.join(format!("{track}.{ext}"))
    }

    /// Writes the upload under its sanitized name; the file only appears once complete.
    pub fn persist_upload(&self, upload: &Upload) -> Result<PathBuf> {
        let dest = self.input_dir.join(sanitize_file_name(&upload.file_name));
        let mut tmp = NamedTempFile::new_in(&self.input_dir)
            .map_err(|e| StemError::Upload(format!("cannot stage upload: {e}")))?;
        tmp.write_all(&upload.bytes)
            .map_err(|e| StemError::Upload(format!("cannot write upload: {e}")))?;
        tmp.persist(&dest)
            .map_err(|e| StemError::Upload(format!("cannot persist upload: {}", e.error)))?;
        Ok(dest)
    }

    /// Deletes everything the request produced.
    pub fn discard(self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            warn!(request_id = %self.id, error = %e, "failed to discard request dir");
        }
    }
}

impl Drop for RequestDir {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.id);
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

/// Keeps the base name (and its extension) of a client-supplied file name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".into()
    } else {
        trimmed.to_string()
    }
}
