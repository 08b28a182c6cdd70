//! src/services/upload_service.rs
//!
//! UploadService: chunked upload assembly and single-shot uploads.
//!
//! Chunks for one upload share a correlation key (the client's original file
//! name) and are kept in `temp_dir` as `{key}.part_{n}`. Assembly streams
//! them in index order into a hidden file in `downloads_dir`, renames it to
//! `{id}-{name}` once complete, then registers a metadata record in the
//! entity store. Chunks are only removed after the artifact and its record
//! are in place, so a failed assembly can be retried as is.

use crate::{
    models::{
        entity::{EntityKind, EntityRecord},
        upload::{AssembleRequest, AssembledArtifact, ChunkReceipt, StoredFile},
    },
    services::{
        ids::IdGenerator,
        json_store::{JsonStore, StoreError},
    },
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use serde_json::Value;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Public URL prefix under which `downloads_dir` is served.
pub const DOWNLOAD_ROOT: &str = "/downloads";

const MAX_FILENAME_LEN: usize = 255;
/// Longest chunk key suffix, `.part_{u32::MAX}`.
const CHUNK_SUFFIX_MAX_LEN: usize = ".part_".len() + 10;
/// Longest artifact prefix, `{u64::MAX}-`.
const ID_PREFIX_MAX_LEN: usize = 20 + 1;
const COPY_BUFFER_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid file name `{0}`")]
    InvalidFilename(String),
    #[error("chunk {0} is empty")]
    EmptyChunk(u32),
    #[error("totalChunks must be at least 1")]
    NoChunks,
    #[error("Missing chunk number {0}")]
    MissingChunk(u32),
    #[error("file `{0}` not found")]
    FileNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// A request body already written to a hidden file in `temp_dir`, waiting
/// to be renamed once the chunk's key is known.
#[derive(Debug)]
pub struct StagedChunk {
    path: PathBuf,
    size_bytes: u64,
}

impl StagedChunk {
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

#[derive(Clone)]
pub struct UploadService {
    temp_dir: PathBuf,
    downloads_dir: PathBuf,
    store: JsonStore,
    ids: IdGenerator,
}

impl UploadService {
    /// Create the service, making sure both directories exist.
    pub async fn new(
        temp_dir: impl Into<PathBuf>,
        downloads_dir: impl Into<PathBuf>,
        store: JsonStore,
        ids: IdGenerator,
    ) -> UploadResult<Self> {
        let temp_dir = temp_dir.into();
        let downloads_dir = downloads_dir.into();
        fs::create_dir_all(&temp_dir).await?;
        fs::create_dir_all(&downloads_dir).await?;
        Ok(Self {
            temp_dir,
            downloads_dir,
            store,
            ids,
        })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    fn chunk_path(&self, original_filename: &str, chunk_number: u32) -> PathBuf {
        self.temp_dir
            .join(format!("{original_filename}.part_{chunk_number}"))
    }

    /// Store one chunk under `{original_filename}.part_{chunk_number}`.
    ///
    /// Re-sending a chunk replaces the previous copy. Empty payloads are
    /// rejected and leave any earlier copy in place.
    pub async fn receive_chunk<S>(
        &self,
        chunk_number: u32,
        original_filename: &str,
        stream: S,
    ) -> UploadResult<ChunkReceipt>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        ensure_upload_name(original_filename)?;
        let staged = self.stage_chunk(stream).await?;
        self.commit_chunk(staged, chunk_number, original_filename)
            .await
    }

    /// Write an incoming chunk body to a hidden temp file.
    ///
    /// Multipart clients may send the payload before the fields naming it,
    /// so the body is staged first and committed with [`commit_chunk`].
    ///
    /// [`commit_chunk`]: UploadService::commit_chunk
    pub async fn stage_chunk<S>(&self, stream: S) -> UploadResult<StagedChunk>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let path = self.temp_dir.join(format!(".incoming-{}", Uuid::new_v4()));
        let (size_bytes, _) = write_stream(&path, stream).await?;
        Ok(StagedChunk { path, size_bytes })
    }

    /// Move a staged body into place as chunk `chunk_number` of `original_filename`.
    pub async fn commit_chunk(
        &self,
        staged: StagedChunk,
        chunk_number: u32,
        original_filename: &str,
    ) -> UploadResult<ChunkReceipt> {
        if let Err(err) = ensure_upload_name(original_filename) {
            self.discard_staged(staged).await;
            return Err(err);
        }
        if staged.size_bytes == 0 {
            self.discard_staged(staged).await;
            return Err(UploadError::EmptyChunk(chunk_number));
        }

        let chunk_path = self.chunk_path(original_filename, chunk_number);
        if let Err(err) = fs::rename(&staged.path, &chunk_path).await {
            let _ = fs::remove_file(&staged.path).await;
            return Err(UploadError::Io(err));
        }

        info!(
            "received chunk {} for {} ({} bytes)",
            chunk_number, original_filename, staged.size_bytes
        );
        Ok(ChunkReceipt {
            chunk_number,
            size_bytes: staged.size_bytes,
        })
    }

    /// Drop a staged body that will never be committed.
    pub async fn discard_staged(&self, staged: StagedChunk) {
        if let Err(err) = fs::remove_file(&staged.path).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    "failed to remove staged chunk {}: {}",
                    staged.path.display(),
                    err
                );
            }
        }
    }

    /// Concatenate chunks `0..total_chunks` into the final artifact and
    /// register its metadata record.
    ///
    /// - Every chunk must be present; the first missing index is reported
    ///   and nothing is written.
    /// - Bytes are appended strictly in index order, whatever order the
    ///   chunks arrived in.
    /// - The artifact only appears under its final name after the last
    ///   chunk is synced; an aborted assembly leaves no partial file.
    /// - If the metadata write fails, the artifact is deleted again.
    /// - Chunk files are deleted (best-effort) once the artifact and its
    ///   record are committed. Any earlier failure keeps them for a retry.
    ///
    /// No lock serializes assemblies of the same key: a concurrent
    /// `receive_chunk` for that key can interleave with this call.
    pub async fn assemble(&self, req: &AssembleRequest) -> UploadResult<AssembledArtifact> {
        let original_filename = req.original_filename.as_str();
        ensure_upload_name(original_filename)?;
        if req.total_chunks == 0 {
            return Err(UploadError::NoChunks);
        }

        for chunk_number in 0..req.total_chunks {
            if !path_exists(&self.chunk_path(original_filename, chunk_number)).await? {
                warn!(
                    "missing chunk number {} for {}",
                    chunk_number, original_filename
                );
                return Err(UploadError::MissingChunk(chunk_number));
            }
        }

        let id = self.ids.next_id();
        let file_name = final_file_name(id, original_filename);
        let final_path = self.downloads_dir.join(&file_name);
        let tmp_path = self
            .downloads_dir
            .join(format!(".assembling-{}", Uuid::new_v4()));

        info!(
            "assembling {} chunks for {} into {}",
            req.total_chunks, original_filename, file_name
        );

        let (size_bytes, etag) = match self
            .append_chunks(&tmp_path, original_filename, req.total_chunks)
            .await
        {
            Ok(done) => done,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(UploadError::Io(err));
        }
        info!(
            "finished assembling {} ({} bytes, md5 {})",
            file_name, size_bytes, etag
        );

        let download_url = format!("{DOWNLOAD_ROOT}/{file_name}");
        let mut record_id = None;
        if let Some(entity) = req.registration_target() {
            let mut record = req.fields.clone();
            let new_id = self.ids.next_id();
            record.insert("id".into(), Value::from(new_id));
            record.insert("fileName".into(), Value::from(file_name.clone()));
            record.insert("downloadUrl".into(), Value::from(download_url.clone()));

            if let Err(err) = self.prepend_record(entity, record).await {
                warn!(
                    "metadata write for {} failed, removing artifact: {}",
                    file_name, err
                );
                let _ = fs::remove_file(&final_path).await;
                return Err(err);
            }
            info!("saved metadata for {} to {}", file_name, entity);
            record_id = Some(new_id);
        }

        self.remove_chunks(original_filename, req.total_chunks).await;

        Ok(AssembledArtifact {
            file_name,
            download_url,
            size_bytes,
            etag,
            record_id,
        })
    }

    /// Stream every chunk into `out_path` and return (size, md5 hex).
    async fn append_chunks(
        &self,
        out_path: &Path,
        original_filename: &str,
        total_chunks: u32,
    ) -> UploadResult<(u64, String)> {
        let mut out = File::create(out_path).await?;
        let mut digest = Context::new();
        let mut size_bytes: u64 = 0;
        let mut buf = vec![0u8; COPY_BUFFER_LEN];

        for chunk_number in 0..total_chunks {
            let chunk_path = self.chunk_path(original_filename, chunk_number);
            let mut chunk = match File::open(&chunk_path).await {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    warn!(
                        "chunk {} for {} vanished during assembly",
                        chunk_number, original_filename
                    );
                    return Err(UploadError::MissingChunk(chunk_number));
                }
                Err(err) => return Err(UploadError::Io(err)),
            };

            let mut chunk_bytes: u64 = 0;
            loop {
                let n = chunk.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                digest.consume(&buf[..n]);
                out.write_all(&buf[..n]).await?;
                chunk_bytes += n as u64;
            }
            size_bytes += chunk_bytes;
            debug!(
                "appended chunk {} of {} ({} bytes)",
                chunk_number, original_filename, chunk_bytes
            );
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    async fn remove_chunks(&self, original_filename: &str, total_chunks: u32) {
        for chunk_number in 0..total_chunks {
            let chunk_path = self.chunk_path(original_filename, chunk_number);
            if let Err(err) = fs::remove_file(&chunk_path).await {
                warn!(
                    "failed to delete chunk {}: {}",
                    chunk_path.display(),
                    err
                );
            }
        }
    }

    /// Single-shot upload into the downloads directory, named like an
    /// assembled artifact.
    pub async fn store_file<S>(&self, original_name: &str, stream: S) -> UploadResult<StoredFile>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        ensure_upload_name(original_name)?;
        let file_name = final_file_name(self.ids.next_id(), original_name);
        let final_path = self.downloads_dir.join(&file_name);
        let tmp_path = self
            .downloads_dir
            .join(format!(".incoming-{}", Uuid::new_v4()));

        let (size_bytes, _) = write_stream(&tmp_path, stream).await?;
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(UploadError::Io(err));
        }

        info!("saved file {} ({} bytes)", file_name, size_bytes);
        Ok(StoredFile {
            download_url: format!("{DOWNLOAD_ROOT}/{file_name}"),
            file_name,
            size_bytes,
        })
    }

    /// Store a submission file and register it in the `submissions` table.
    pub async fn submit<S>(
        &self,
        original_name: &str,
        mut record: EntityRecord,
        stream: S,
    ) -> UploadResult<EntityRecord>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let stored = self.store_file(original_name, stream).await?;
        record.insert("id".into(), Value::from(self.ids.next_id()));
        record.insert("fileName".into(), Value::from(stored.file_name.clone()));
        record.insert("downloadUrl".into(), Value::from(stored.download_url));

        if let Err(err) = self
            .prepend_record(EntityKind::Submissions, record.clone())
            .await
        {
            let _ = fs::remove_file(self.downloads_dir.join(&stored.file_name)).await;
            return Err(err);
        }
        Ok(record)
    }

    async fn prepend_record(&self, entity: EntityKind, record: EntityRecord) -> UploadResult<()> {
        self.store
            .update(entity.table(), |records: &mut Vec<EntityRecord>| {
                records.insert(0, record)
            })
            .await?;
        Ok(())
    }

    /// Open a stored artifact for streaming out.
    pub async fn open_download(&self, file_name: &str) -> UploadResult<(File, u64)> {
        ensure_filename_safe(file_name)?;
        if file_name.starts_with('.') {
            return Err(UploadError::FileNotFound(file_name.to_string()));
        }
        let path = self.downloads_dir.join(file_name);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                UploadError::FileNotFound(file_name.to_string())
            } else {
                UploadError::Io(err)
            }
        })?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(UploadError::FileNotFound(file_name.to_string()));
        }
        Ok((file, meta.len()))
    }
}

/// Reject client-supplied names that could escape their directory.
///
/// Names must be a single path component: not `.` or `..`, no
/// separators, no control characters, and at most 255 bytes.
pub fn ensure_filename_safe(name: &str) -> UploadResult<()> {
    let invalid = || UploadError::InvalidFilename(name.to_string());
    if name.trim().is_empty() || name.len() > MAX_FILENAME_LEN {
        return Err(invalid());
    }
    if name == "." || name == ".." {
        return Err(invalid());
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(invalid());
    }
    Ok(())
}

/// Validate a client-supplied upload name.
///
/// On top of [`ensure_filename_safe`], the name may not be hidden (those
/// are reserved for staging files) and must leave room for both the chunk
/// key suffix and the artifact id prefix, so every name derived from it
/// stays a valid file name.
pub fn ensure_upload_name(name: &str) -> UploadResult<()> {
    ensure_filename_safe(name)?;
    let derived_len = name.len() + CHUNK_SUFFIX_MAX_LEN.max(ID_PREFIX_MAX_LEN);
    if name.starts_with('.') || derived_len > MAX_FILENAME_LEN {
        return Err(UploadError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

/// `{id}-{name}` with every whitespace run replaced by `_`.
pub fn final_file_name(id: u64, original_name: &str) -> String {
    let mut sanitized = String::with_capacity(original_name.len());
    let mut in_space = false;
    for c in original_name.chars() {
        if c.is_whitespace() {
            if !in_space {
                sanitized.push('_');
            }
            in_space = true;
        } else {
            sanitized.push(c);
            in_space = false;
        }
    }
    format!("{id}-{sanitized}")
}

async fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Stream a body into a new file at `path`, removing it on any error.
/// Returns (size, md5 hex).
async fn write_stream<S>(path: &Path, stream: S) -> UploadResult<(u64, String)>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: u64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);
    while let Some(chunk_res) = stream.next().await {
        let chunk = match chunk_res {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = fs::remove_file(path).await;
                return Err(UploadError::Io(err));
            }
        };
        size_bytes += chunk.len() as u64;
        digest.consume(&chunk);
        if let Err(err) = file.write_all(&chunk).await {
            let _ = fs::remove_file(path).await;
            return Err(UploadError::Io(err));
        }
    }
    if let Err(err) = file.flush().await {
        let _ = fs::remove_file(path).await;
        return Err(UploadError::Io(err));
    }
    if let Err(err) = file.sync_all().await {
        let _ = fs::remove_file(path).await;
        return Err(UploadError::Io(err));
    }
    Ok((size_bytes, format!("{:x}", digest.compute())))
}
