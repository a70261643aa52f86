//! End-to-end tests for Stowline.
//!
//! Every test starts its own emulator on an ephemeral loopback port and talks
//! to it through the reqwest transport, so no external server is needed:
//!
//! ```text
//! cargo test -p stowline-integration
//! ```

use std::sync::{Arc, Once};
use std::time::Duration;

use stowline_core::{ObjectHandle, TransferConfig};
use stowline_emulator::EmulatorHandle;
use stowline_http::{HttpRequestFactory, StaticTokenSource};
use stowline_transfer::{
    AuthorizedRequestFactory, DownloadCoordinator, FileSessionStore, SessionStore,
    UploadCoordinator,
};
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// An emulator plus coordinators wired to it.
#[derive(Debug)]
pub struct TestContext {
    /// The running emulator.
    pub emulator: EmulatorHandle,
    /// Session store backing `uploads`.
    pub store: Arc<FileSessionStore>,
    /// Upload coordinator.
    pub uploads: UploadCoordinator,
    /// Download coordinator.
    pub downloads: DownloadCoordinator,
    /// Bucket used by this test.
    pub bucket: String,
    _dir: TempDir,
}

impl TestContext {
    /// Start an emulator and build coordinators for it.
    pub async fn start() -> Self {
        init_tracing();

        let emulator = EmulatorHandle::spawn_local()
            .await
            .expect("start emulator");
        let dir = tempfile::tempdir().expect("create session dir");
        let config = TransferConfig::builder()
            .endpoint(emulator.endpoint())
            .session_dir(dir.path().to_string_lossy().into_owned())
            .simple_upload_threshold(1024)
            .build();

        let factory: Arc<dyn AuthorizedRequestFactory> = Arc::new(
            HttpRequestFactory::new(Arc::new(StaticTokenSource::new("integration-token")))
                .expect("build HTTP factory"),
        );
        let store = Arc::new(FileSessionStore::new(config.session_file()));
        let uploads = UploadCoordinator::new(
            &config,
            Arc::clone(&factory),
            Arc::clone(&store) as Arc<dyn SessionStore>,
        );
        let downloads = DownloadCoordinator::new(&config, factory);

        Self {
            emulator,
            store,
            uploads,
            downloads,
            bucket: test_bucket_name(),
            _dir: dir,
        }
    }

    /// Handle for `name` in this test's bucket.
    #[must_use]
    pub fn object(&self, name: &str) -> ObjectHandle {
        ObjectHandle::new(self.bucket.clone(), name).expect("valid object handle")
    }

    /// Upload id of the persisted session for `object`, once the emulator holds
    /// at least one of its bytes.
    pub async fn wait_for_partial_upload(&self, object: &ObjectHandle) -> String {
        for _ in 0..500 {
            if let Ok(Some(record)) = self.store.get(&object.key()).await {
                if let Some((_, id)) = record.uri.split_once("upload_id=") {
                    if self.emulator.state().session_len(id).unwrap_or(0) > 0 {
                        return id.to_owned();
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no partial upload for {object}");
    }
}

/// Generate a unique bucket name for a test.
#[must_use]
pub fn test_bucket_name() -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("test-{id}")
}

/// Deterministic payload of `len` bytes.
#[must_use]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

mod test_download;
mod test_resume;
mod test_upload;
mod test_validation;
