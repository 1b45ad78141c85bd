use super::{
    decode_document, encode_document, lock, merge_document, validate_root_id, MergeMode,
    PersistenceGateway, Subscribers, Subscription,
};
use crate::error::{Result, SchemaTreeError};
use crate::schema::Collection;
use crate::watcher::FileWatcher;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Gateway over a directory holding one `<id>.json` file per root document.
///
/// Files are replaced atomically through a temp file in the same directory.
/// A batch is validated and merged before the first file is written, but
/// the writes themselves are not transactional across files.
pub struct DirectoryGateway {
    dir: PathBuf,
    merge_mode: MergeMode,
    subscribers: Subscribers,
    watcher: Mutex<Option<FileWatcher>>,
}

impl DirectoryGateway {
    /// Open a document directory, creating it if needed.
    pub fn open(dir: &Path, merge_mode: MergeMode) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(DirectoryGateway {
            dir: dir.to_path_buf(),
            merge_mode,
            subscribers: Subscribers::default(),
            watcher: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start watching the directory for edits made by other processes.
    /// External changes are picked up by [`PersistenceGateway::poll`].
    pub fn watch(&self) -> Result<()> {
        let mut watcher = lock(&self.watcher);
        if watcher.is_none() {
            *watcher = Some(FileWatcher::start(&self.dir, Duration::from_millis(100))?);
            log::info!("Watching {} for schema changes", self.dir.display());
        }
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.watcher).is_some()
    }

    /// All root documents in the directory, ordered by id.
    /// Files that no longer decode are skipped with a warning.
    pub fn list_documents(&self) -> Result<Vec<Collection>> {
        let pattern = format!(
            "{}/*.json",
            glob::Pattern::escape(&self.dir.display().to_string())
        );
        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| SchemaTreeError::Other(format!("Glob error: {e}")))?
            .filter_map(|r| r.ok())
            .filter(|p| crate::watcher::is_document_file(p))
            .collect();
        files.sort();

        let mut roots = Vec::with_capacity(files.len());
        for file in &files {
            match read_document(file) {
                Ok(root) => roots.push(root),
                Err(e) => log::warn!("Skipping unreadable root document {}: {e}", file.display()),
            }
        }
        Ok(roots)
    }

    fn document_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn write_document(&self, root: &Collection) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(encode_document(root)?.as_bytes())?;
        tmp.flush()?;
        tmp.persist(self.document_path(&root.id))
            .map_err(|e| SchemaTreeError::Io(e.error))?;
        Ok(())
    }
}

/// Read a root document. The file name is its key, so a stored `id` that
/// disagrees with the file stem is overwritten by the stem.
fn read_document(path: &Path) -> Result<Collection> {
    let json = std::fs::read_to_string(path)?;
    let mut root = decode_document(&json)?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SchemaTreeError::InvalidPath(format!("{} has no file stem", path.display())))?;
    if root.id != stem {
        log::warn!(
            "Root document {} stores id '{}', using '{stem}'",
            path.display(),
            root.id
        );
        root.id = stem.to_string();
    }
    Ok(root)
}

impl PersistenceGateway for DirectoryGateway {
    fn subscribe(&self) -> Result<Subscription> {
        Ok(self.subscribers.add(self.list_documents()?))
    }

    fn get_document(&self, id: &str) -> Result<Option<Collection>> {
        if validate_root_id(id).is_err() {
            return Ok(None);
        }
        let path = self.document_path(id);
        if !path.exists() {
            return Ok(None);
        }
        read_document(&path).map(Some)
    }

    fn set_documents(&self, roots: &[Collection]) -> Result<bool> {
        if roots.is_empty() {
            return Ok(false);
        }

        let mut merged = Vec::with_capacity(roots.len());
        for root in roots {
            validate_root_id(&root.id)?;
            let existing = self.get_document(&root.id)?;
            merged.push(merge_document(existing.as_ref(), root, self.merge_mode)?);
        }
        for root in &merged {
            self.write_document(root)?;
        }

        self.subscribers.broadcast(&self.list_documents()?);
        Ok(true)
    }

    fn remove_documents(&self, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        for id in ids {
            if validate_root_id(id).is_err() {
                continue;
            }
            let path = self.document_path(id);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }

        self.subscribers.broadcast(&self.list_documents()?);
        Ok(())
    }

    fn merge_mode(&self) -> MergeMode {
        self.merge_mode
    }

    fn poll(&self) -> Result<usize> {
        let events = match lock(&self.watcher).as_ref() {
            Some(watcher) => watcher.drain(),
            None => return Ok(0),
        };
        if events.is_empty() {
            return Ok(0);
        }
        for event in &events {
            log::debug!("{:?} {}", event.kind, event.path.display());
        }
        self.subscribers.broadcast(&self.list_documents()?);
        Ok(events.len())
    }
}
