//! Durable key-value storage for credentials.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{GymError, GymResult};

use super::{
    ALL_KEYS, KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_ROLE, KEY_SUPERUSER, KEY_TOKEN_TYPE, Role,
    Session,
};

/// String key-value store that survives restarts.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> GymResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> GymResult<()>;
    fn remove(&self, key: &str) -> GymResult<()>;

    /// Apply several changes together; `None` removes the key. Stores that
    /// can fail part way override this so nothing is applied on error.
    fn update(&self, changes: &[(&str, Option<&str>)]) -> GymResult<()> {
        for (key, value) in changes {
            match value {
                Some(v) => self.set(key, v)?,
                None => self.remove(key)?,
            }
        }
        Ok(())
    }
}

/// Session-shaped access on top of any [`CredentialStore`].
pub(crate) trait SessionRecords: CredentialStore {
    fn load_session(&self) -> GymResult<Session> {
        let role = match self.get(KEY_ROLE)? {
            Some(raw) => match raw.parse::<Role>() {
                Ok(role) => Some(role),
                Err(_) => {
                    tracing::warn!(role = %raw, "Ignoring unknown persisted role");
                    None
                }
            },
            None => None,
        };

        Ok(Session::from_parts(
            self.get(KEY_ACCESS_TOKEN)?,
            self.get(KEY_REFRESH_TOKEN)?,
            role,
            self.get(KEY_TOKEN_TYPE)?,
            self.get(KEY_SUPERUSER)?.as_deref() == Some("true"),
        ))
    }

    fn save_session(&self, session: &Session) -> GymResult<()> {
        let entries = [
            (KEY_ACCESS_TOKEN, session.access_token().map(str::to_string)),
            (KEY_REFRESH_TOKEN, session.refresh_token().map(str::to_string)),
            (KEY_ROLE, session.role().map(|r| r.as_str().to_string())),
            (KEY_TOKEN_TYPE, Some(session.token_type().to_string())),
            (KEY_SUPERUSER, Some(session.is_superuser().to_string())),
        ];

        let changes: Vec<(&str, Option<&str>)> = entries
            .iter()
            .map(|(key, value)| (*key, value.as_deref()))
            .collect();
        self.update(&changes)
    }

    fn clear_session(&self) -> GymResult<()> {
        let changes: Vec<(&str, Option<&str>)> = ALL_KEYS.iter().map(|key| (*key, None)).collect();
        self.update(&changes)
    }
}

impl<S: CredentialStore + ?Sized> SessionRecords for S {}

/// Process-local store, used when nothing should touch the disk.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> GymResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> GymResult<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> GymResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn update(&self, changes: &[(&str, Option<&str>)]) -> GymResult<()> {
        let mut entries = self.entries.lock();
        for (key, value) in changes {
            match value {
                Some(v) => entries.insert(key.to_string(), v.to_string()),
                None => entries.remove(*key),
            };
        }
        Ok(())
    }
}

/// JSON file store. The whole map is rewritten on every change through a
/// temporary file and a rename; an empty map deletes the file. The in-memory
/// map only changes once the disk write succeeded.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> GymResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                GymError::Storage(format!("Corrupt credentials file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> GymResult<()> {
        if entries.is_empty() {
            return match fs::remove_file(&self.path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> GymResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> GymResult<()> {
        self.update(&[(key, Some(value))])
    }

    fn remove(&self, key: &str) -> GymResult<()> {
        self.update(&[(key, None)])
    }

    fn update(&self, changes: &[(&str, Option<&str>)]) -> GymResult<()> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        for (key, value) in changes {
            match value {
                Some(v) => next.insert(key.to_string(), v.to_string()),
                None => next.remove(*key),
            };
        }

        if next == *entries {
            return Ok(());
        }
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_session() -> Session {
        Session::from_parts(
            Some("access".into()),
            Some("refresh".into()),
            Some(Role::Admin),
            Some("bearer".into()),
            true,
        )
    }

    #[test]
    fn test_memory_store_session_roundtrip() {
        let store = MemoryStore::new();
        store.save_session(&sample_session()).unwrap();

        let loaded = store.load_session().unwrap();
        assert_eq!(loaded, sample_session());

        store.clear_session().unwrap();
        assert_eq!(store.load_session().unwrap(), Session::default());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.save_session(&sample_session()).unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.load_session().unwrap(), sample_session());
    }

    #[test]
    fn test_file_store_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileStore::open(&path).unwrap();

        store.save_session(&sample_session()).unwrap();
        assert!(path.exists());
        store.clear_session().unwrap();

        assert!(!path.exists());
        assert_eq!(FileStore::open(&path).unwrap().load_session().unwrap(), Session::default());
    }

    #[test]
    fn test_failed_save_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileStore::open(&path).unwrap();
        store.save_session(&sample_session()).unwrap();

        fs::create_dir(dir.path().join("credentials.tmp")).unwrap();
        let replacement = Session::from_parts(
            Some("other-access".into()),
            None,
            Some(Role::Trainer),
            None,
            false,
        );
        assert!(store.save_session(&replacement).is_err());

        assert_eq!(store.load_session().unwrap(), sample_session());
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.load_session().unwrap(), sample_session());
    }

    #[test]
    fn test_clear_succeeds_while_temp_file_is_blocked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileStore::open(&path).unwrap();
        store.save_session(&sample_session()).unwrap();

        fs::create_dir(dir.path().join("credentials.tmp")).unwrap();
        store.clear_session().unwrap();

        assert_eq!(store.get(KEY_REFRESH_TOKEN).unwrap(), None);
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.load_session().unwrap(), Session::default());
    }

    #[test]
    fn test_orphaned_role_is_dropped_on_load() {
        let store = MemoryStore::new();
        store.set(KEY_ROLE, "admin").unwrap();

        let session = store.load_session().unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(session.role(), None);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "{not json").unwrap();

        let err = FileStore::open(&path).err().unwrap();
        assert_eq!(err.kind(), "storage_error");
    }
}
