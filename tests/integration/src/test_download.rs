//! Download integration tests.

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use futures::StreamExt;
    use stowline_core::{TransferOptions, UploadStrategy};

    use crate::{TestContext, payload};

    #[tokio::test]
    async fn test_should_stream_validated_download() {
        let ctx = TestContext::start().await;
        let object = ctx.object("dir/file.jpg");
        let data = payload(200_000);
        ctx.uploads
            .upload_bytes(
                object.clone(),
                TransferOptions::builder()
                    .strategy(Some(UploadStrategy::Resumable))
                    .build(),
                data.clone(),
            )
            .await
            .unwrap();
        ctx.emulator.state().clear_requests();

        let mut stream = ctx.downloads.open_download_stream(object);
        let mut received = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received.as_ref(), data.as_slice());

        let requests = ctx.emulator.state().requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].path.ends_with("/o/dir%2Ffile.jpg"));
        assert!(requests[1].path.starts_with("/download/storage/v1/"));
        assert!(requests[1].path.contains("alt=media"));
    }

    #[tokio::test]
    async fn test_should_report_missing_object_before_reading() {
        let ctx = TestContext::start().await;

        let mut stream = ctx.downloads.open_download_stream(ctx.object("absent.bin"));
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        assert!(stream.next().await.is_none());

        let requests = ctx.emulator.state().requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].path.contains("alt=media"));
    }

    #[tokio::test]
    async fn test_should_not_fetch_media_when_metadata_fails() {
        let ctx = TestContext::start().await;
        let object = ctx.object("present.bin");
        ctx.uploads
            .upload_bytes(object.clone(), TransferOptions::default(), payload(32))
            .await
            .unwrap();
        ctx.emulator.state().faults.set_fail_metadata(true);
        ctx.emulator.state().clear_requests();

        let err = ctx.downloads.download_bytes(object).await.unwrap_err();
        assert_eq!(err.code(), "TRANSFER_FAILED");
        assert_eq!(ctx.emulator.state().requests().len(), 1);
    }

    #[tokio::test]
    async fn test_should_download_empty_object() {
        let ctx = TestContext::start().await;
        let object = ctx.object("empty");
        ctx.uploads
            .upload_bytes(object.clone(), TransferOptions::default(), Vec::new())
            .await
            .unwrap();

        let data = ctx.downloads.download_bytes(object).await.unwrap();
        assert!(data.is_empty());
    }
}
