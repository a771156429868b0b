use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::warn;

use super::{apply_ops, AreaOp, KeyValueArea};
use crate::error::{ConsoleError, ConsoleResult};

/// Area persisted as a single JSON object on disk.
///
/// The in-memory map is authoritative for reads. Every `apply` rewrites the whole
/// document through a temp file and a rename, so a batch lands on disk in one step.
pub struct FileArea {
    path: PathBuf,
    map: RwLock<BTreeMap<String, String>>,
}

impl FileArea {
    /// Open (or lazily create) the area at `path`. A corrupt document is logged
    /// and treated as empty so the console can still reach the login surface.
    pub fn open(path: impl AsRef<Path>) -> ConsoleResult<Self> {
        let path = path.as_ref().to_path_buf();
        let map = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    warn!(target: "console::storage", "ignoring unreadable area '{}': {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(ConsoleError::storage(format!("read {}: {}", path.display(), e))),
        };
        Ok(Self { path, map: RwLock::new(map) })
    }

    pub fn path(&self) -> &Path { &self.path }

    fn persist(&self, map: &BTreeMap<String, String>) -> ConsoleResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConsoleError::storage(format!("create {}: {}", parent.display(), e)))?;
            }
        }
        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|e| ConsoleError::storage(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| ConsoleError::storage(format!("rename to {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

impl KeyValueArea for FileArea {
    fn get(&self, key: &str) -> Option<String> { self.map.read().get(key).cloned() }

    fn apply(&self, ops: Vec<AreaOp>) -> ConsoleResult<()> {
        let mut map = self.map.write();
        apply_ops(&mut *map, ops);
        // Memory already reflects the batch; a failed write only loses durability.
        self.persist(&map)
    }

    fn keys(&self) -> Vec<String> { self.map.read().keys().cloned().collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("area.json");
        {
            let area = FileArea::open(&path).unwrap();
            area.apply(vec![
                AreaOp::Set("console.token".into(), "t1".into()),
                AreaOp::Set("console.user".into(), "{}".into()),
            ])
            .unwrap();
        }
        let reopened = FileArea::open(&path).unwrap();
        assert_eq!(reopened.get("console.token").as_deref(), Some("t1"));
        assert_eq!(reopened.keys().len(), 2);
    }

    #[test]
    fn batch_removal_is_persisted() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("area.json");
        let area = FileArea::open(&path).unwrap();
        area.set("a", "1").unwrap();
        area.set("b", "2").unwrap();
        area.apply(vec![AreaOp::Remove("a".into()), AreaOp::Remove("b".into())]).unwrap();
        let reopened = FileArea::open(&path).unwrap();
        assert!(reopened.keys().is_empty());
    }

    #[test]
    fn corrupt_document_opens_empty() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("area.json");
        std::fs::write(&path, b"{not json").unwrap();
        let area = FileArea::open(&path).unwrap();
        assert!(area.get("console.token").is_none());
    }
}
