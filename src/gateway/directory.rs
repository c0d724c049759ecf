//! Gateway writing into a directory tree (local disk or a mounted share).

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::gateway::traits::is_plain_file_name;
use crate::gateway::{UploadGateway, UploadOutcome};
use crate::storage::InstrumentId;

/// Delivers files to `<base_dir>/<instrument_id>/<filename>`.
///
/// Bytes are written to a hidden sibling, synced, then hard-linked into
/// place. The link fails if the target exists, so a file already in the
/// store is never replaced and a reader never sees a partial file.
#[derive(Debug, Clone)]
pub struct DirectoryGateway {
    base_dir: PathBuf,
}

impl DirectoryGateway {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    async fn base_ready(&self) -> bool {
        tokio::fs::metadata(&self.base_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

/// Flags the blocking publish as abandoned when the upload future is dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Staging file, removed when it goes out of scope.
struct Staging(PathBuf);

impl Drop for Staging {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

/// Stage, sync and link `content` to `target`. Runs on the blocking pool
/// and always cleans up its staging file, even if the caller went away.
fn publish(target: &Path, content: &[u8], cancelled: &AtomicBool) -> UploadOutcome {
    let (Some(dir), Some(name)) = (target.parent(), target.file_name()) else {
        return UploadOutcome::Unrecognized(format!("invalid target {}", target.display()));
    };
    let staging = Staging(dir.join(format!(
        ".{}.{}.part",
        name.to_string_lossy(),
        uuid::Uuid::new_v4()
    )));

    let written = File::options()
        .write(true)
        .create_new(true)
        .open(&staging.0)
        .and_then(|mut file| {
            file.write_all(content)?;
            file.sync_all()
        });
    if let Err(e) = written {
        return UploadOutcome::Unrecognized(format!("write {} failed: {e}", target.display()));
    }

    if cancelled.load(Ordering::SeqCst) {
        return UploadOutcome::GatewayNotReady;
    }

    match fs::hard_link(&staging.0, target) {
        Ok(()) => UploadOutcome::Succeeded,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => UploadOutcome::AlreadyExists,
        Err(e) => UploadOutcome::Unrecognized(format!("link {} failed: {e}", target.display())),
    }
}

#[async_trait::async_trait]
impl UploadGateway for DirectoryGateway {
    fn describe(&self) -> String {
        format!("directory:{}", self.base_dir.display())
    }

    async fn upload(
        &self,
        instrument_id: InstrumentId,
        filename: &str,
        content: &[u8],
    ) -> UploadOutcome {
        if !is_plain_file_name(filename) {
            return UploadOutcome::Unrecognized(format!("invalid file name '{filename}'"));
        }
        if !self.base_ready().await {
            tracing::debug!(base_dir = %self.base_dir.display(), "Destination directory unavailable");
            return UploadOutcome::GatewayNotReady;
        }

        let instrument_dir = self.base_dir.join(instrument_id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&instrument_dir).await {
            return UploadOutcome::Unrecognized(format!(
                "cannot create {}: {e}",
                instrument_dir.display()
            ));
        }

        let target = instrument_dir.join(filename);
        // Cheap early answer; the link below is what guarantees no overwrite.
        if let Ok(true) = tokio::fs::try_exists(&target).await {
            return UploadOutcome::AlreadyExists;
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let _cancel = CancelOnDrop(Arc::clone(&cancelled));
        let content = content.to_vec();
        let job = tokio::task::spawn_blocking(move || publish(&target, &content, &cancelled));
        match job.await {
            Ok(outcome) => outcome,
            Err(e) => UploadOutcome::Unrecognized(format!("publish task failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_writes_file() {
        let base = TempDir::new().unwrap();
        let gateway = DirectoryGateway::new(base.path());

        let outcome = gateway.upload(InstrumentId(7), "a.csv", b"1,2,3").await;
        assert_eq!(outcome, UploadOutcome::Succeeded);

        let written = std::fs::read(base.path().join("7").join("a.csv")).unwrap();
        assert_eq!(written, b"1,2,3");
    }

    #[tokio::test]
    async fn test_upload_leaves_no_staging_files() {
        let base = TempDir::new().unwrap();
        let gateway = DirectoryGateway::new(base.path());

        gateway.upload(InstrumentId(1), "a.csv", b"x").await;
        gateway.upload(InstrumentId(1), "b.csv", b"y").await;

        let mut names: Vec<String> = std::fs::read_dir(base.path().join("1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[tokio::test]
    async fn test_existing_target_is_already_exists() {
        let base = TempDir::new().unwrap();
        let gateway = DirectoryGateway::new(base.path());

        assert_eq!(
            gateway.upload(InstrumentId(1), "a.csv", b"first").await,
            UploadOutcome::Succeeded
        );
        assert_eq!(
            gateway.upload(InstrumentId(1), "a.csv", b"second").await,
            UploadOutcome::AlreadyExists
        );

        let written = std::fs::read(base.path().join("1").join("a.csv")).unwrap();
        assert_eq!(written, b"first");
    }

    #[tokio::test]
    async fn test_same_name_different_instruments() {
        let base = TempDir::new().unwrap();
        let gateway = DirectoryGateway::new(base.path());

        assert_eq!(gateway.upload(InstrumentId(1), "a.csv", b"1").await, UploadOutcome::Succeeded);
        assert_eq!(gateway.upload(InstrumentId(2), "a.csv", b"2").await, UploadOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_missing_base_is_not_ready() {
        let base = TempDir::new().unwrap();
        let gateway = DirectoryGateway::new(base.path().join("unmounted"));

        assert_eq!(
            gateway.upload(InstrumentId(1), "a.csv", b"x").await,
            UploadOutcome::GatewayNotReady
        );
    }

    #[tokio::test]
    async fn test_base_is_a_file_is_not_ready() {
        let base = TempDir::new().unwrap();
        let file = base.path().join("plain");
        std::fs::write(&file, b"").unwrap();
        let gateway = DirectoryGateway::new(&file);

        assert_eq!(
            gateway.upload(InstrumentId(1), "a.csv", b"x").await,
            UploadOutcome::GatewayNotReady
        );
    }

    #[tokio::test]
    async fn test_path_traversal_is_unrecognized() {
        let base = TempDir::new().unwrap();
        let gateway = DirectoryGateway::new(base.path());

        let outcome = gateway.upload(InstrumentId(1), "../escape.csv", b"x").await;
        assert!(matches!(outcome, UploadOutcome::Unrecognized(_)));
        assert!(!base.path().join("escape.csv").exists());
    }

    #[test]
    fn test_publish_never_replaces_target() {
        let base = TempDir::new().unwrap();
        let target = base.path().join("a.csv");
        std::fs::write(&target, b"raced in").unwrap();

        let outcome = publish(&target, b"ours", &AtomicBool::new(false));
        assert_eq!(outcome, UploadOutcome::AlreadyExists);
        assert_eq!(std::fs::read(&target).unwrap(), b"raced in");
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_cancelled_publish_leaves_nothing() {
        let base = TempDir::new().unwrap();
        let target = base.path().join("a.csv");

        let outcome = publish(&target, b"late", &AtomicBool::new(true));
        assert_eq!(outcome, UploadOutcome::GatewayNotReady);
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_upload_leaves_no_staging_file() {
        let base = TempDir::new().unwrap();
        let gateway = DirectoryGateway::new(base.path());
        let content = vec![b'x'; 1 << 20];

        let _ = tokio::time::timeout(
            std::time::Duration::ZERO,
            gateway.upload(InstrumentId(1), "big.csv", &content),
        )
        .await;
        // The blocking publish finishes on its own; give it time.
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        let leftovers: Vec<String> = std::fs::read_dir(base.path().join("1"))
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .filter(|n| n.ends_with(".part"))
                    .collect()
            })
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "staging files left: {leftovers:?}");
    }

    #[test]
    fn test_describe() {
        let gateway = DirectoryGateway::new("/srv/nrt-drop");
        assert_eq!(gateway.describe(), "directory:/srv/nrt-drop");
    }
}
