//! Resumable session integration tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stowline_core::{TransferOptions, UploadStrategy, ValidationMode};
    use stowline_transfer::{SessionStore, TransferError};

    use crate::{TestContext, payload};

    fn resumable(validation: ValidationMode) -> TransferOptions {
        TransferOptions::builder()
            .validation(validation)
            .strategy(Some(UploadStrategy::Resumable))
            .build()
    }

    /// Start an upload of `data`, send only its first half, and abort once the
    /// emulator has persisted part of it.
    async fn interrupt_upload(ctx: &TestContext, name: &str, data: &[u8]) -> String {
        let object = ctx.object(name);
        let mut stream = ctx
            .uploads
            .open_upload_stream(object.clone(), resumable(ValidationMode::Md5));
        stream.write(data[..data.len() / 2].to_vec()).await.unwrap();

        let upload_id = ctx.wait_for_partial_upload(&object).await;
        stream.abort();
        // Let the emulator observe the dropped connection.
        tokio::time::sleep(Duration::from_millis(200)).await;
        upload_id
    }

    #[tokio::test]
    async fn test_should_resume_interrupted_upload_from_persisted_offset() {
        let ctx = TestContext::start().await;
        let data = payload(512 * 1024);
        let upload_id = interrupt_upload(&ctx, "big.bin", &data).await;

        let persisted = ctx.emulator.state().session_len(&upload_id).unwrap();
        assert!(persisted > 0);
        assert!(ctx.store.get(&ctx.object("big.bin").key()).await.unwrap().is_some());
        ctx.emulator.state().clear_requests();

        ctx.uploads
            .upload_bytes(ctx.object("big.bin"), resumable(ValidationMode::Md5), data.clone())
            .await
            .unwrap();

        let requests = ctx.emulator.state().requests();
        assert!(requests.iter().all(|r| r.method != "POST"));
        assert_eq!(requests[0].content_range.as_deref(), Some("bytes */*"));
        assert_eq!(
            requests[1].content_range.as_deref(),
            Some(format!("bytes {persisted}-*/*").as_str())
        );

        let stored = ctx.emulator.state().get_object(&ctx.bucket, "big.bin").unwrap();
        assert_eq!(stored.data.as_ref(), data.as_slice());
        assert!(ctx.store.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_should_validate_whole_payload_after_resume() {
        let ctx = TestContext::start().await;
        let data = payload(300 * 1024);
        interrupt_upload(&ctx, "crc.bin", &data).await;

        let metadata = ctx
            .uploads
            .upload_bytes(ctx.object("crc.bin"), resumable(ValidationMode::Crc32c), data.clone())
            .await
            .unwrap();

        let stored = ctx.emulator.state().get_object(&ctx.bucket, "crc.bin").unwrap();
        assert_eq!(metadata.crc32c.as_deref(), Some(stored.crc32c.as_str()));
        assert_eq!(stored.data.len(), data.len());
    }

    #[tokio::test]
    async fn test_should_restart_after_discarding_session() {
        let ctx = TestContext::start().await;
        let data = payload(256 * 1024);
        interrupt_upload(&ctx, "restart.bin", &data).await;

        ctx.uploads.discard_session(&ctx.object("restart.bin")).await.unwrap();
        assert!(ctx.store.entries().await.unwrap().is_empty());
        ctx.emulator.state().clear_requests();

        ctx.uploads
            .upload_bytes(ctx.object("restart.bin"), resumable(ValidationMode::Md5), data.clone())
            .await
            .unwrap();

        let requests = ctx.emulator.state().requests();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[1].content_range.as_deref(), Some("bytes 0-*/*"));
        let stored = ctx.emulator.state().get_object(&ctx.bucket, "restart.bin").unwrap();
        assert_eq!(stored.data.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_should_report_finished_session_without_resending() {
        let ctx = TestContext::start().await;
        let data = payload(4096);
        let object = ctx.object("finished.bin");

        ctx.uploads
            .upload_bytes(object.clone(), resumable(ValidationMode::Md5), data.clone())
            .await
            .unwrap();
        let uri = ctx
            .emulator
            .state()
            .requests()
            .into_iter()
            .find(|r| r.method == "PUT")
            .map(|r| format!("{}{}", ctx.emulator.endpoint(), r.path))
            .unwrap();

        // A record left behind by a process that died after the final PUT.
        ctx.store
            .set(&object.key(), stowline_transfer::SessionRecord::new(uri))
            .await
            .unwrap();
        ctx.emulator.state().clear_requests();

        ctx.uploads
            .upload_bytes(object, resumable(ValidationMode::Md5), data)
            .await
            .unwrap();

        let requests = ctx.emulator.state().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].content_range.as_deref(), Some("bytes */*"));
        assert!(ctx.store.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_should_fail_and_forget_unknown_session() {
        let ctx = TestContext::start().await;
        let object = ctx.object("gone.bin");
        let uri = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=resumable&upload_id=missing",
            ctx.emulator.endpoint(),
            ctx.bucket
        );
        ctx.store
            .set(&object.key(), stowline_transfer::SessionRecord::new(uri))
            .await
            .unwrap();

        let err = ctx
            .uploads
            .upload_bytes(object.clone(), resumable(ValidationMode::Md5), payload(2048))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Transfer { .. }), "{err}");
        assert!(ctx.store.get(&object.key()).await.unwrap().is_none());

        // The next attempt negotiates a fresh session.
        ctx.uploads
            .upload_bytes(object, resumable(ValidationMode::Md5), payload(2048))
            .await
            .unwrap();
    }
}
