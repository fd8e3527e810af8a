//! Client-local persisted state: tokens and the per-install device id.
//!
//! The [`KeyValueStore`] trait is the seam; [`FileStore`] persists to a JSON
//! file and [`MemoryStore`] keeps everything in memory.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::error::StoreError;

pub const ACCESS_TOKEN_KEY: &str = "hondacamera.access_token";
pub const REFRESH_TOKEN_KEY: &str = "hondacamera.refresh_token";
pub const TOKEN_EXPIRES_AT_KEY: &str = "hondacamera.token_expires_at";
pub const DEVICE_ID_KEY: &str = "hondacamera.device_id";

/// String key-value storage
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk.
///
/// The file is read once on open and rewritten (via a temporary file and a
/// rename) on every change. A change that cannot be written is not applied.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
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

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries();
        let mut updated = entries.clone();
        updated.insert(key.to_string(), value.to_string());
        self.persist(&updated)?;
        *entries = updated;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries();
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut updated = entries.clone();
        updated.remove(key);
        self.persist(&updated)?;
        *entries = updated;
        Ok(())
    }
}

/// Return the per-install device id, creating and persisting a random one
/// on first use.
pub fn device_id(store: &dyn KeyValueStore) -> Result<String, StoreError> {
    if let Some(existing) = store.get(DEVICE_ID_KEY)?.filter(|id| !id.trim().is_empty()) {
        return Ok(existing);
    }

    let id = uuid::Uuid::new_v4().to_string();
    store.set(DEVICE_ID_KEY, &id)?;
    tracing::info!("Generated new device id {}", id);
    Ok(id)
}

/// Bearer + refresh token pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix millis after which the access token is expired
    pub expires_at: Option<i64>,
}

impl Tokens {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at.is_some_and(|at| now_millis >= at)
    }
}

/// Tokens persisted under fixed keys of a [`KeyValueStore`]
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<Option<Tokens>, StoreError> {
        let access = self.store.get(ACCESS_TOKEN_KEY)?;
        let refresh = self.store.get(REFRESH_TOKEN_KEY)?;
        let (Some(access_token), Some(refresh_token)) = (access, refresh) else {
            return Ok(None);
        };

        let expires_at = self
            .store
            .get(TOKEN_EXPIRES_AT_KEY)?
            .and_then(|value| value.parse::<i64>().ok());

        Ok(Some(Tokens {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    pub fn save(&self, tokens: &Tokens) -> Result<(), StoreError> {
        self.store.set(ACCESS_TOKEN_KEY, &tokens.access_token)?;
        self.store.set(REFRESH_TOKEN_KEY, &tokens.refresh_token)?;
        match tokens.expires_at {
            Some(at) => self.store.set(TOKEN_EXPIRES_AT_KEY, &at.to_string()),
            None => self.store.remove(TOKEN_EXPIRES_AT_KEY),
        }
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(ACCESS_TOKEN_KEY)?;
        self.store.remove(REFRESH_TOKEN_KEY)?;
        self.store.remove(TOKEN_EXPIRES_AT_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("hondacamera-store-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_device_id_is_created_once() {
        // テスト項目: 端末 ID は初回のみ生成され、以後は同じ値が返る
        // given (前提条件):
        let store = MemoryStore::new();

        // when (操作):
        let first = device_id(&store).unwrap();
        let second = device_id(&store).unwrap();

        // then (期待する結果):
        assert_eq!(first, second);
        assert_eq!(store.get(DEVICE_ID_KEY).unwrap(), Some(first));
    }

    #[test]
    fn test_existing_device_id_is_not_rewritten() {
        // テスト項目: 保存済みの端末 ID がある場合は書き込みが発生しない
        // given (前提条件):
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .withf(|key| key == DEVICE_ID_KEY)
            .times(1)
            .returning(|_| Ok(Some("stable-id".to_string())));
        store.expect_set().times(0);

        // when (操作):
        let id = device_id(&store).unwrap();

        // then (期待する結果):
        assert_eq!(id, "stable-id");
    }

    #[test]
    fn test_missing_device_id_is_generated_and_persisted() {
        // テスト項目: 端末 ID がない場合は UUID が生成され保存される
        // given (前提条件):
        let mut store = MockKeyValueStore::new();
        store.expect_get().returning(|_| Ok(None));
        store
            .expect_set()
            .withf(|key, value| key == DEVICE_ID_KEY && uuid::Uuid::parse_str(value).is_ok())
            .times(1)
            .returning(|_, _| Ok(()));

        // when (操作):
        let id = device_id(&store).unwrap();

        // then (期待する結果):
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_device_id_store_failure_is_propagated() {
        // テスト項目: ストアのエラーは呼び出し元に伝播する
        let mut store = MockKeyValueStore::new();
        store.expect_get().returning(|_| {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        });

        assert!(matches!(device_id(&store), Err(StoreError::Io(_))));
    }

    #[test]
    fn test_token_store_roundtrip_and_clear() {
        // テスト項目: トークンの保存・読み込み・削除ができる
        // given (前提条件):
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        let saved = Tokens {
            access_token: "a1".to_string(),
            refresh_token: "r1".to_string(),
            expires_at: Some(1_000),
        };

        // when (操作):
        tokens.save(&saved).unwrap();
        let loaded = tokens.load().unwrap();
        tokens.clear().unwrap();

        // then (期待する結果):
        assert_eq!(loaded, Some(saved));
        assert_eq!(tokens.load().unwrap(), None);
    }

    #[test]
    fn test_tokens_expiry() {
        // テスト項目: 有効期限を過ぎたトークンは期限切れと判定される
        let tokens = Tokens {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Some(100),
        };
        let no_expiry = Tokens {
            expires_at: None,
            ..tokens.clone()
        };

        assert!(!tokens.is_expired(99));
        assert!(tokens.is_expired(100));
        assert!(!no_expiry.is_expired(i64::MAX));
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        // テスト項目: FileStore の内容は再オープン後も保持される
        // given (前提条件):
        let path = temp_path("store.json");
        let store = FileStore::open(&path).unwrap();

        // when (操作):
        store.set("k", "v").unwrap();
        store.set("gone", "x").unwrap();
        store.remove("gone").unwrap();
        let reopened = FileStore::open(&path).unwrap();

        // then (期待する結果):
        assert_eq!(reopened.get("k").unwrap(), Some("v".to_string()));
        assert_eq!(reopened.get("gone").unwrap(), None);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_file_store_keeps_memory_and_disk_in_step_when_write_fails() {
        // テスト項目: 書き込みに失敗した変更はメモリにも反映されない
        // given (前提条件):
        let path = temp_path("store.json");
        let store = FileStore::open(&path).unwrap();
        store.set("k", "v1").unwrap();
        // A directory where the temporary file goes makes every write fail
        fs::create_dir_all(path.with_extension("tmp")).unwrap();

        // when (操作):
        let set = store.set("k", "v2");
        let removed = store.remove("k");

        // then (期待する結果):
        assert!(matches!(set, Err(StoreError::Io(_))));
        assert!(matches!(removed, Err(StoreError::Io(_))));
        assert_eq!(store.get("k").unwrap(), Some("v1".to_string()));
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("k").unwrap(), Some("v1".to_string()));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_file_store_rejects_corrupted_file() {
        // テスト項目: 壊れたファイルは Corrupted エラーになる
        let path = temp_path("broken.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let result = FileStore::open(&path);

        assert!(matches!(result, Err(StoreError::Corrupted(_))));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
