//! Crash-safe JSON persistence.
//!
//! Every write goes to `<target>.tmp`, is fsynced, then renamed over the
//! target. A failure before the rename leaves the previous file untouched.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const TMP_SUFFIX: &str = "tmp";

/// Temporary sibling used while writing `path`.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;

    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(&json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", tmp.display()))?;
    }

    // rename() replaces the target atomically on Unix; Windows refuses to
    // overwrite, so the old file has to go first there.
    #[cfg(windows)]
    {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| {
            format!("failed to rename {} to {}", tmp.display(), path.display())
        });
    }
    Ok(())
}

/// Read and deserialize `path`. A missing file yields `None`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Delete `*.tmp` files left behind by an interrupted write.
pub fn remove_orphaned_tmp(dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("failed to scan {}", dir.display())),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == TMP_SUFFIX) && path.is_file() {
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "removed orphaned temp file");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove orphaned temp file");
                }
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/doc.json");
        let doc = Doc {
            name: "a".into(),
            count: 3,
        };
        write_json_atomic(&path, &doc).unwrap();
        assert_eq!(read_json::<Doc>(&path).unwrap(), Some(doc));
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn overwrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &Doc { name: "a".into(), count: 1 }).unwrap();
        write_json_atomic(&path, &Doc { name: "b".into(), count: 2 }).unwrap();
        let doc: Doc = read_json(&path).unwrap().unwrap();
        assert_eq!(doc.name, "b");
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_json::<Doc>(&dir.path().join("nope.json")).unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "{ not json").unwrap();
        let err = read_json::<Doc>(&path).unwrap_err();
        assert!(format!("{err:#}").contains("doc.json"));
    }

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(
            tmp_path(Path::new("/x/task-001.json")),
            PathBuf::from("/x/task-001.json.tmp")
        );
    }

    #[test]
    fn orphan_sweep_only_touches_tmp() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("task-001.json"), "{}").unwrap();
        fs::write(dir.path().join("task-002.json.tmp"), "{").unwrap();
        assert_eq!(remove_orphaned_tmp(dir.path()).unwrap(), 1);
        assert!(dir.path().join("task-001.json").exists());
        assert!(!dir.path().join("task-002.json.tmp").exists());
        assert_eq!(remove_orphaned_tmp(&dir.path().join("missing")).unwrap(), 0);
    }
}
