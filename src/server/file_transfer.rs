//! Remote file transfer over the connection's SFTP handle
//!
//! Listings are cached per connection. Upload invalidates the target directory;
//! move invalidates the parent directories of source and destination only.

use base64::Engine;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::server::channel_registry::FileHandle;
use crate::server::ssh::{join_remote, normalize_remote, parent_remote, BridgeError, RemoteEntry};

/// Upper bound for an in-memory download archive
pub const MAX_ARCHIVE_SIZE: usize = 256 * 1024 * 1024;

/// Maximum path length
pub const MAX_PATH_LENGTH: usize = 4096;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Remote(#[from] BridgeError),
    #[error("Archive error: {0}")]
    Archive(String),
}

/// Directory listings keyed by normalized remote path
#[derive(Default)]
pub struct ListingCache {
    entries: Mutex<HashMap<String, Vec<RemoteEntry>>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Vec<RemoteEntry>> {
        self.entries.lock().ok()?.get(&normalize_remote(path)).cloned()
    }

    pub fn put(&self, path: &str, entries: Vec<RemoteEntry>) {
        if let Ok(mut map) = self.entries.lock() {
            map.insert(normalize_remote(path), entries);
        }
    }

    pub fn invalidate(&self, path: &str) {
        if let Ok(mut map) = self.entries.lock() {
            map.remove(&normalize_remote(path));
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries
            .lock()
            .map(|map| map.contains_key(&normalize_remote(path)))
            .unwrap_or(false)
    }
}

fn validate_path(path: &str) -> Result<(), TransferError> {
    if path.trim().is_empty() {
        return Err(TransferError::Invalid("Path is required".to_string()));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(TransferError::Invalid("Path exceeds maximum length".to_string()));
    }
    if path.contains('\0') {
        return Err(TransferError::Invalid("Path contains NUL".to_string()));
    }
    Ok(())
}

/// A plain file name: no separators, not `.` or `..`
fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(TransferError::Invalid(format!("Invalid file name: {:?}", name)));
    }
    if name.contains(['/', '\\', '\0']) || name.contains("..") {
        return Err(TransferError::Invalid(format!("Invalid file name: {}", name)));
    }
    Ok(())
}

/// Directories first, then by name
fn sort_entries(entries: &mut [RemoteEntry]) {
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
}

/// Cached listing of `path`; `refresh` forces a remote read
pub async fn list(
    handle: &FileHandle,
    path: &str,
    refresh: bool,
) -> Result<Vec<RemoteEntry>, TransferError> {
    validate_path(path)?;
    let path = normalize_remote(path);
    if !refresh {
        if let Some(entries) = handle.cache.get(&path) {
            debug!(path = %path, "Listing served from cache");
            return Ok(entries);
        }
    }

    let mut entries = handle.files.list_dir(&path).await?;
    sort_entries(&mut entries);
    handle.cache.put(&path, entries.clone());
    Ok(entries)
}

/// Decode base64 content and write it to `dir/name`. Returns the remote path.
pub async fn upload(
    handle: &FileHandle,
    dir: &str,
    name: &str,
    data_base64: &str,
) -> Result<String, TransferError> {
    validate_path(dir)?;
    validate_file_name(name)?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(data_base64.trim())
        .map_err(|e| TransferError::Invalid(format!("Invalid base64 content: {}", e)))?;

    let path = join_remote(dir, name);
    handle.files.write_file(&path, &data).await?;
    handle.cache.invalidate(dir);
    info!(path = %path, bytes = data.len(), "Uploaded file");
    Ok(path)
}

/// Rename `src` to `dest` on the remote host
pub async fn move_path(handle: &FileHandle, src: &str, dest: &str) -> Result<(), TransferError> {
    validate_path(src)?;
    validate_path(dest)?;
    if src == dest {
        return Err(TransferError::Invalid("Source and destination are the same".to_string()));
    }
    handle.files.rename(src, dest).await?;
    handle.cache.invalidate(&parent_remote(src));
    handle.cache.invalidate(&parent_remote(dest));
    info!(src, dest, "Moved remote path");
    Ok(())
}

fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Build a tar archive of `paths`, recursing into directories.
///
/// Returns the suggested archive name and the archive bytes.
pub async fn download_batch(
    handle: &FileHandle,
    paths: &[String],
) -> Result<(String, Vec<u8>), TransferError> {
    if paths.is_empty() {
        return Err(TransferError::Invalid("No paths selected".to_string()));
    }
    for path in paths {
        validate_path(path)?;
    }

    let mut builder = tar::Builder::new(Vec::new());
    let mut total = 0usize;

    for root in paths {
        let root_name = base_name(root).to_string();
        // (remote path, path inside the archive)
        let mut pending = vec![(root.clone(), root_name)];

        while let Some((remote, archived)) = pending.pop() {
            if handle.files.is_dir(&remote).await? {
                append_dir(&mut builder, &archived)?;
                for entry in handle.files.list_dir(&remote).await? {
                    pending.push((entry.path.clone(), format!("{}/{}", archived, entry.name)));
                }
                continue;
            }

            let data = handle.files.read_file(&remote).await?;
            total += data.len();
            if total > MAX_ARCHIVE_SIZE {
                return Err(TransferError::Invalid(format!(
                    "Selection exceeds {} MB archive limit",
                    MAX_ARCHIVE_SIZE / (1024 * 1024)
                )));
            }
            append_file(&mut builder, &archived, &data)?;
        }
    }

    let bytes = builder
        .into_inner()
        .map_err(|e| TransferError::Archive(e.to_string()))?;

    let name = match paths {
        [single] => format!("{}.tar", base_name(single)),
        _ => format!("download-{}.tar", chrono::Local::now().format("%Y%m%d-%H%M%S")),
    };
    info!(name = %name, paths = paths.len(), bytes = bytes.len(), "Built download archive");
    Ok((name, bytes))
}

fn append_dir(builder: &mut tar::Builder<Vec<u8>>, archived: &str) -> Result<(), TransferError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(0o755);
    header.set_size(0);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{}/", archived), std::io::empty())
        .map_err(|e| TransferError::Archive(e.to_string()))
}

fn append_file(
    builder: &mut tar::Builder<Vec<u8>>,
    archived: &str,
    data: &[u8],
) -> Result<(), TransferError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(data.len() as u64);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();
    builder
        .append_data(&mut header, archived, data)
        .map_err(|e| TransferError::Archive(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::channel_registry::fakes::FakeFs;
    use std::io::Read;
    use std::sync::Arc;

    fn handle(fs: Arc<FakeFs>) -> FileHandle {
        FileHandle {
            files: fs,
            cache: Arc::new(ListingCache::new()),
        }
    }

    fn sample_fs() -> Arc<FakeFs> {
        let fs = FakeFs::with_cwd("/home/ubuntu");
        fs.add_file("/home/ubuntu", "b.txt", b"bee");
        fs.add_dir("/home/ubuntu", "logs");
        fs.add_file("/home/ubuntu", "a.txt", b"ay");
        fs.add_file("/home/ubuntu/logs", "app.log", b"started\n");
        fs.add_dir("/srv", "app");
        Arc::new(fs)
    }

    #[tokio::test]
    async fn test_list_sorted_and_cached() {
        let fs = sample_fs();
        let h = handle(fs.clone());

        let entries = list(&h, "/home/ubuntu", false).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["logs", "a.txt", "b.txt"]);

        list(&h, "/home/ubuntu", false).await.unwrap();
        assert_eq!(fs.list_count("/home/ubuntu"), 1);

        list(&h, "/home/ubuntu", true).await.unwrap();
        assert_eq!(fs.list_count("/home/ubuntu"), 2);
    }

    #[tokio::test]
    async fn test_upload_invalidates_directory() {
        let fs = sample_fs();
        let h = handle(fs.clone());
        list(&h, "/home/ubuntu", false).await.unwrap();
        list(&h, "/home/ubuntu/logs", false).await.unwrap();

        let path = upload(&h, "/home/ubuntu", "notes.txt", "aGVsbG8=").await.unwrap();
        assert_eq!(path, "/home/ubuntu/notes.txt");
        assert_eq!(fs.files.lock().unwrap().get(&path).unwrap(), b"hello");
        assert!(!h.cache.contains("/home/ubuntu"));
        assert!(h.cache.contains("/home/ubuntu/logs"));
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_input() {
        let h = handle(sample_fs());
        assert!(matches!(
            upload(&h, "/home/ubuntu", "x.txt", "***").await,
            Err(TransferError::Invalid(_))
        ));
        assert!(matches!(
            upload(&h, "/home/ubuntu", "../x.txt", "aGk=").await,
            Err(TransferError::Invalid(_))
        ));
        assert!(matches!(
            upload(&h, "/home/ubuntu", "a/b.txt", "aGk=").await,
            Err(TransferError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_move_invalidates_only_parents() {
        let fs = sample_fs();
        let h = handle(fs.clone());
        list(&h, "/home/ubuntu", false).await.unwrap();
        list(&h, "/home/ubuntu/logs", false).await.unwrap();
        list(&h, "/srv", false).await.unwrap();

        move_path(&h, "/home/ubuntu/a.txt", "/srv/app/a.txt").await.unwrap();

        assert!(!h.cache.contains("/home/ubuntu"));
        assert!(!h.cache.contains("/srv/app"));
        assert!(h.cache.contains("/home/ubuntu/logs"));
        assert!(h.cache.contains("/srv"));
        assert_eq!(
            fs.renames.lock().unwrap().as_slice(),
            &[("/home/ubuntu/a.txt".to_string(), "/srv/app/a.txt".to_string())]
        );
    }

    #[tokio::test]
    async fn test_trailing_slash_shares_cache_entry() {
        let fs = sample_fs();
        let h = handle(fs.clone());
        list(&h, "/home/ubuntu/", false).await.unwrap();
        list(&h, "/home/ubuntu", false).await.unwrap();
        assert_eq!(fs.list_count("/home/ubuntu"), 1);

        move_path(&h, "/home/ubuntu/a.txt", "/srv/a.txt").await.unwrap();
        list(&h, "/home/ubuntu/", false).await.unwrap();
        assert_eq!(fs.list_count("/home/ubuntu"), 2);

        upload(&h, "/home/ubuntu/", "notes.txt", "aGk=").await.unwrap();
        assert!(!h.cache.contains("/home/ubuntu"));
        list(&h, "/home/ubuntu", false).await.unwrap();
        assert_eq!(fs.list_count("/home/ubuntu"), 3);
    }

    #[tokio::test]
    async fn test_download_batch_recurses_directories() {
        let h = handle(sample_fs());
        let paths = vec!["/home/ubuntu/a.txt".to_string(), "/home/ubuntu/logs".to_string()];
        let (name, bytes) = download_batch(&h, &paths).await.unwrap();
        assert!(name.starts_with("download-") && name.ends_with(".tar"));

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut files = HashMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            files.insert(path, content);
        }
        assert_eq!(files.get("a.txt").map(String::as_str), Some("ay"));
        assert_eq!(files.get("logs/app.log").map(String::as_str), Some("started\n"));
        assert!(files.keys().any(|k| k.trim_end_matches('/') == "logs"));
    }

    #[tokio::test]
    async fn test_download_single_file_name() {
        let h = handle(sample_fs());
        let (name, _) = download_batch(&h, &["/home/ubuntu/b.txt".to_string()])
            .await
            .unwrap();
        assert_eq!(name, "b.txt.tar");
    }

    #[tokio::test]
    async fn test_download_missing_path_fails() {
        let h = handle(sample_fs());
        let result = download_batch(&h, &["/nope".to_string()]).await;
        assert!(matches!(result, Err(TransferError::Remote(BridgeError::NotFound(_)))));
    }
}
