//! Checksum validation integration tests.

#[cfg(test)]
mod tests {
    use stowline_core::{TransferOptions, UploadStrategy, ValidationMode};
    use stowline_transfer::TransferError;

    use crate::{TestContext, payload};

    fn options(validation: ValidationMode, strategy: UploadStrategy) -> TransferOptions {
        TransferOptions::builder()
            .validation(validation)
            .strategy(Some(strategy))
            .build()
    }

    #[tokio::test]
    async fn test_should_delete_object_when_checksum_mismatches() {
        let ctx = TestContext::start().await;
        ctx.emulator.state().faults.set_corrupt_checksums(true);
        let object = ctx.object("corrupt.bin");

        let err = ctx
            .uploads
            .upload_bytes(
                object.clone(),
                options(ValidationMode::Crc32c, UploadStrategy::Resumable),
                payload(8192),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "FILE_NO_UPLOAD");
        assert!(ctx.emulator.state().get_object(&ctx.bucket, "corrupt.bin").is_none());
        assert!(ctx.store.entries().await.unwrap().is_empty());

        let delete = ctx
            .emulator
            .state()
            .requests()
            .into_iter()
            .find(|r| r.method == "DELETE")
            .unwrap();
        assert!(delete.path.ends_with(&format!("/b/{}/o/corrupt.bin", ctx.bucket)));
    }

    #[tokio::test]
    async fn test_should_report_failed_cleanup_after_mismatch() {
        let ctx = TestContext::start().await;
        ctx.emulator.state().faults.set_corrupt_checksums(true);
        ctx.emulator.state().faults.set_fail_deletes(true);

        let err = ctx
            .uploads
            .upload_bytes(
                ctx.object("stuck.bin"),
                options(ValidationMode::Md5, UploadStrategy::Simple),
                payload(64),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "FILE_NO_UPLOAD_DELETE");
        let TransferError::FileNoUploadDelete { delete_error, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(delete_error.status().map(|s| s.as_u16()), Some(503));
        // The corrupt object is still there.
        assert!(ctx.emulator.state().get_object(&ctx.bucket, "stuck.bin").is_some());
    }

    #[tokio::test]
    async fn test_should_skip_verification_when_disabled() {
        let ctx = TestContext::start().await;
        ctx.emulator.state().faults.set_corrupt_checksums(true);

        ctx.uploads
            .upload_bytes(
                ctx.object("trusted.bin"),
                options(ValidationMode::None, UploadStrategy::Resumable),
                payload(4096),
            )
            .await
            .unwrap();

        assert!(ctx.emulator.state().get_object(&ctx.bucket, "trusted.bin").is_some());
        assert!(
            ctx.emulator
                .state()
                .requests()
                .iter()
                .all(|r| r.method != "DELETE")
        );
    }

    #[tokio::test]
    async fn test_should_reject_corrupt_download() {
        let ctx = TestContext::start().await;
        let object = ctx.object("served.bin");
        ctx.uploads
            .upload_bytes(
                object.clone(),
                options(ValidationMode::Crc32c, UploadStrategy::Simple),
                payload(1000),
            )
            .await
            .unwrap();

        ctx.emulator.state().faults.set_corrupt_checksums(true);
        let err = ctx.downloads.download_bytes(object).await.unwrap_err();
        assert_eq!(err.code(), "CONTENT_DOWNLOAD_MISMATCH");
    }
}
