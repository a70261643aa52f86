//! Upload integration tests.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use stowline_core::{TransferOptions, UploadStrategy, ValidationMode};
    use stowline_transfer::Phase;

    use crate::{TestContext, payload};

    #[tokio::test]
    async fn test_should_upload_resumable_with_md5_validation() {
        let ctx = TestContext::start().await;
        let object = ctx.object("video.bin");
        let data = payload(256 * 1024);

        let metadata = ctx
            .uploads
            .upload_bytes(
                object.clone(),
                TransferOptions::builder()
                    .validation(ValidationMode::Md5)
                    .build(),
                data.clone(),
            )
            .await
            .unwrap();

        assert_eq!(metadata.size_bytes(), Some(data.len() as u64));
        let stored = ctx.emulator.state().get_object(&ctx.bucket, "video.bin").unwrap();
        assert_eq!(stored.data.as_ref(), data.as_slice());

        let methods: Vec<String> = ctx
            .emulator
            .state()
            .requests()
            .into_iter()
            .map(|r| r.method)
            .collect();
        assert_eq!(methods, vec!["POST", "PUT"]);
    }

    #[tokio::test]
    async fn test_should_stream_chunks_with_crc32c_validation() {
        let ctx = TestContext::start().await;
        let object = ctx.object("logs/app.log");
        let options = TransferOptions::builder()
            .validation(ValidationMode::Crc32c)
            .strategy(Some(UploadStrategy::Resumable))
            .build();

        let mut stream = ctx.uploads.open_upload_stream(object, options);
        let data = payload(100_000);
        for chunk in data.chunks(7_000) {
            stream.write(chunk.to_vec()).await.unwrap();
        }
        let metadata = stream.finish().await.unwrap();

        let stored = ctx.emulator.state().get_object(&ctx.bucket, "logs/app.log").unwrap();
        assert_eq!(stored.data.as_ref(), data.as_slice());
        assert_eq!(metadata.crc32c.as_deref(), Some(stored.crc32c.as_str()));
    }

    #[tokio::test]
    async fn test_should_clear_session_record_after_success() {
        let ctx = TestContext::start().await;
        let object = ctx.object("done.bin");
        let options = TransferOptions::builder()
            .strategy(Some(UploadStrategy::Resumable))
            .build();

        let mut stream = ctx.uploads.open_upload_stream(object, options);
        let mut phases = stream.subscribe();
        stream.write(payload(10)).await.unwrap();
        stream.finish().await.unwrap();

        assert!(matches!(*phases.borrow_and_update(), Phase::Done { .. }));
        assert!(ctx.store.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_should_upload_small_payload_with_single_request() {
        let ctx = TestContext::start().await;
        let object = ctx.object("tiny.txt");

        ctx.uploads
            .upload_bytes(
                object,
                TransferOptions::builder()
                    .content_type(Some("text/plain".to_owned()))
                    .build(),
                "hello world",
            )
            .await
            .unwrap();

        let requests = ctx.emulator.state().requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].path.contains("uploadType=media"));
        let stored = ctx.emulator.state().get_object(&ctx.bucket, "tiny.txt").unwrap();
        assert_eq!(stored.content_type, "text/plain");
        assert!(ctx.store.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_should_send_metadata_with_multipart_upload() {
        let ctx = TestContext::start().await;
        let object = ctx.object("tagged.json");
        let metadata = BTreeMap::from([("owner".to_owned(), "ops".to_owned())]);

        let resource = ctx
            .uploads
            .upload_bytes(
                object,
                TransferOptions::builder()
                    .validation(ValidationMode::Crc32c)
                    .content_type(Some("application/json".to_owned()))
                    .metadata(metadata.clone())
                    .build(),
                r#"{"ok":true}"#,
            )
            .await
            .unwrap();

        assert_eq!(resource.metadata, metadata);
        let requests = ctx.emulator.state().requests();
        assert!(requests[0].path.contains("uploadType=multipart"));
        let stored = ctx.emulator.state().get_object(&ctx.bucket, "tagged.json").unwrap();
        assert_eq!(stored.metadata, metadata);
        assert_eq!(stored.data.as_ref(), br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_should_percent_encode_object_names() {
        let ctx = TestContext::start().await;
        let object = ctx.object("photos/2024/cat one.jpg");

        ctx.uploads
            .upload_bytes(
                object.clone(),
                TransferOptions::builder()
                    .strategy(Some(UploadStrategy::Resumable))
                    .build(),
                payload(2048),
            )
            .await
            .unwrap();
        ctx.downloads.download_bytes(object).await.unwrap();

        let requests = ctx.emulator.state().requests();
        assert!(requests[0].path.contains("name=photos%2F2024%2Fcat%20one.jpg"));
        let metadata_get = requests
            .iter()
            .find(|r| r.method == "GET")
            .unwrap();
        assert!(metadata_get.path.contains("/o/photos%2F2024%2Fcat%20one.jpg"));
        assert!(
            ctx.emulator
                .state()
                .get_object(&ctx.bucket, "photos/2024/cat one.jpg")
                .is_some()
        );
    }
}
