//! JsonStore: whole-file JSON tables under a data directory.
//!
//! Each table lives in `{root}/{table}.json`. Every read-modify-write of a
//! table runs under that table's own mutex, and writes land through a temp
//! file that is fsynced and renamed over the previous version.

use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table `{table}` is not valid JSON: {source}")]
    Corrupt {
        table: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not encode table `{table}`: {source}")]
    Encode {
        table: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct JsonStore {
    root: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl JsonStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.json"))
    }

    async fn table_lock(&self, table: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read a whole table. A missing or empty file reads as `T::default()`.
    pub async fn load<T>(&self, table: &str) -> StoreResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let lock = self.table_lock(table).await;
        let _guard = lock.lock().await;
        self.read_table(table).await
    }

    /// Replace a whole table.
    pub async fn save<T>(&self, table: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize,
    {
        let lock = self.table_lock(table).await;
        let _guard = lock.lock().await;
        self.write_table(table, value).await
    }

    /// Read, mutate and write back a table while holding its lock.
    ///
    /// The closure's return value is handed back to the caller once the new
    /// contents are durable. If the write fails, nothing is persisted.
    pub async fn update<T, R, F>(&self, table: &str, mutate: F) -> StoreResult<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> R,
    {
        let lock = self.table_lock(table).await;
        let _guard = lock.lock().await;
        let mut value: T = self.read_table(table).await?;
        let result = mutate(&mut value);
        self.write_table(table, &value).await?;
        Ok(result)
    }

    async fn read_table<T>(&self, table: &str) -> StoreResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let path = self.table_path(table);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("table {} not found, starting empty", path.display());
                return Ok(T::default());
            }
            Err(err) => return Err(StoreError::Io(err)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
            table: table.to_string(),
            source,
        })
    }

    async fn write_table<T>(&self, table: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize,
    {
        let encoded = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode {
            table: table.to_string(),
            source,
        })?;

        let path = self.table_path(table);
        let tmp_path = self.root.join(format!(".{table}.json.tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = write_and_sync(&mut file, &encoded).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        debug!("wrote {} bytes to {}", encoded.len(), path.display());
        Ok(())
    }
}

async fn write_and_sync(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}
