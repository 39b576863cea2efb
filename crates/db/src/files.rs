use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use docflow_core::attachments::FileStore;
use docflow_core::config::StorageConfig;
use docflow_core::domain::attachment::UploadedFile;
use docflow_core::store::StoreError;

/// Attachment payloads on the local filesystem. Stored names are prefixed
/// with a uuid so colliding upload names never overwrite each other.
pub struct FsFileStore {
    root: PathBuf,
}

impl FsFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.root.clone())
    }
}

fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    base.chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

fn io_err(error: std::io::Error) -> StoreError {
    StoreError::Backend(format!("file storage error: {error}"))
}

#[async_trait]
impl FileStore for FsFileStore {
    async fn store(&self, upload: &UploadedFile) -> Result<String, StoreError> {
        fs::create_dir_all(&self.root).await.map_err(io_err)?;

        let stored_ref = format!("{}-{}", Uuid::new_v4(), sanitize_file_name(&upload.file_name));
        fs::write(self.root.join(&stored_ref), &upload.bytes).await.map_err(io_err)?;
        Ok(stored_ref)
    }

    async fn delete(&self, stored_ref: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.root.join(stored_ref)).await {
            Ok(()) => Ok(()),
            // Idempotent: a file that is already gone is not an error.
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(io_err(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use docflow_core::attachments::FileStore;
    use docflow_core::domain::attachment::UploadedFile;

    use super::{sanitize_file_name, FsFileStore};

    fn upload(file_name: &str) -> UploadedFile {
        UploadedFile {
            file_name: file_name.to_string(),
            content_type: "application/pdf".to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn store_writes_payload_under_unique_name() {
        let dir = TempDir::new().expect("tempdir");
        let store = FsFileStore::new(dir.path());

        let first = store.store(&upload("proposal.pdf")).await.expect("store");
        let second = store.store(&upload("proposal.pdf")).await.expect("store again");

        assert_ne!(first, second);
        let bytes = tokio::fs::read(dir.path().join(&first)).await.expect("read back");
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let store = FsFileStore::new(dir.path());

        let stored_ref = store.store(&upload("notes.txt")).await.expect("store");
        store.delete(&stored_ref).await.expect("first delete");
        store.delete(&stored_ref).await.expect("second delete is a no-op");
        store.delete("never-existed").await.expect("missing file is fine");
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("q3 report (final).pdf"), "q3_report__final_.pdf");
        assert_eq!(sanitize_file_name("plain.txt"), "plain.txt");
    }
}
