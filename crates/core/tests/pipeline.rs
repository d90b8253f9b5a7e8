mod common;

use common::{page_height, wait_for_calls, Call, ScriptedBackend};
use pdf_reader_cache::{CacheConfig, DocumentId, PageCache, TileRect};
use pdf_reader_core::{PageDisplay, RenderPipeline, RequestState};
use pdf_reader_scheduler::{CancellationToken, Priority, RenderError, RenderScheduler};
use std::sync::Arc;

fn pipeline(backend: &Arc<ScriptedBackend>) -> RenderPipeline {
    RenderPipeline::new(
        PageCache::new(CacheConfig::default().with_max_mb(64)),
        RenderScheduler::with_max_concurrency(2),
        backend.clone(),
    )
}

fn doc() -> DocumentId {
    DocumentId::from("book.pdf")
}

#[tokio::test]
async fn test_page_miss_then_hit() {
    let backend = Arc::new(ScriptedBackend::new().with_document("book.pdf", 3));
    let pipeline = pipeline(&backend);

    let first = pipeline
        .page(&doc(), 1, 400, CancellationToken::new(), Priority::VISIBLE)
        .await
        .unwrap();
    assert_eq!(first.width, 400);
    assert_eq!(first.height, page_height(400));
    assert_eq!(first.pixels.len(), (400 * page_height(400) * 4) as usize);

    let second = pipeline
        .page(&doc(), 1, 400, CancellationToken::new(), Priority::VISIBLE)
        .await
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(backend.page_calls(), 1);

    let stats = pipeline.cache().stats();
    assert_eq!(stats.entries, 1);
    assert!(stats.hits >= 1);
}

#[tokio::test]
async fn test_identical_requests_share_one_backend_call() {
    let backend = Arc::new(ScriptedBackend::gated().with_document("book.pdf", 3));
    let pipeline = pipeline(&backend);

    let a = tokio::spawn({
        let pipeline = pipeline.clone();
        async move {
            pipeline
                .page(&doc(), 0, 300, CancellationToken::new(), Priority::OVERSCAN)
                .await
        }
    });
    wait_for_calls(&backend, 1).await;

    let b = tokio::spawn({
        let pipeline = pipeline.clone();
        async move {
            pipeline
                .page(&doc(), 0, 300, CancellationToken::new(), Priority::VISIBLE)
                .await
        }
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(pipeline.scheduler().stats().deduplicated, 1);

    backend.release(1);
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(a, b);
    assert_eq!(backend.page_calls(), 1);
}

#[tokio::test]
async fn test_failure_is_isolated_and_not_cached() {
    let backend = Arc::new(ScriptedBackend::new().with_document("book.pdf", 3));
    backend.fail_page("book.pdf", 1);
    let pipeline = pipeline(&backend);

    let failed = pipeline
        .page(&doc(), 1, 200, CancellationToken::new(), Priority::VISIBLE)
        .await;
    let ok = pipeline
        .page(&doc(), 2, 200, CancellationToken::new(), Priority::VISIBLE)
        .await;

    let state = RequestState::from_result(failed);
    assert!(state.error().unwrap().contains("scripted page failure"));
    assert!(ok.is_ok());

    // The failure left nothing behind, so the next request retries.
    assert!(pipeline.cache().get_any_page(&doc(), 1).is_none());
    let _ = pipeline
        .page(&doc(), 1, 200, CancellationToken::new(), Priority::VISIBLE)
        .await;
    assert_eq!(backend.page_calls(), 3);
}

#[tokio::test]
async fn test_cancelled_request_never_reaches_backend() {
    let backend = Arc::new(ScriptedBackend::new().with_document("book.pdf", 3));
    let pipeline = pipeline(&backend);

    let token = CancellationToken::new();
    token.cancel();
    let result = pipeline.page(&doc(), 0, 200, token, Priority::VISIBLE).await;

    assert_eq!(result, Err(RenderError::Aborted));
    assert!(RequestState::from_result(result).is_loading());
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_result_discarded_when_cancelled_mid_flight() {
    let backend = Arc::new(ScriptedBackend::gated().with_document("book.pdf", 3));
    let pipeline = pipeline(&backend);
    let token = CancellationToken::new();

    let request = tokio::spawn({
        let pipeline = pipeline.clone();
        let token = token.clone();
        async move { pipeline.page(&doc(), 0, 200, token, Priority::VISIBLE).await }
    });
    wait_for_calls(&backend, 1).await;

    token.cancel();
    backend.release(1);

    assert_eq!(request.await.unwrap(), Err(RenderError::Aborted));
    assert!(pipeline.cache().get_any_page(&doc(), 0).is_none());
    assert_eq!(pipeline.cache().total_bytes(), 0);
}

#[tokio::test]
async fn test_malformed_payload_is_backend_error() {
    let backend = Arc::new(ScriptedBackend::new().with_document("book.pdf", 1));
    backend.send_malformed();
    let pipeline = pipeline(&backend);

    let result = pipeline
        .page(&doc(), 0, 100, CancellationToken::new(), Priority::VISIBLE)
        .await;
    match result {
        Err(RenderError::Backend(message)) => assert!(message.contains("pixel bytes")),
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_placeholder_reuses_any_resolution() {
    let backend = Arc::new(ScriptedBackend::new().with_document("book.pdf", 2));
    let pipeline = pipeline(&backend);

    pipeline
        .page(&doc(), 0, 900, CancellationToken::new(), Priority::VISIBLE)
        .await
        .unwrap();
    let placeholder = pipeline
        .placeholder(&doc(), 0, 512, CancellationToken::new(), Priority::PLACEHOLDER)
        .await
        .unwrap();

    assert_eq!(placeholder.width, 900);
    assert_eq!(backend.page_calls(), 1);

    let display = PageDisplay::resolve(RequestState::Loading, Some(placeholder));
    assert!(matches!(display, PageDisplay::Placeholder(_)));
}

#[tokio::test]
async fn test_tile_round_trip() {
    let backend = Arc::new(ScriptedBackend::new().with_document("book.pdf", 2));
    let pipeline = pipeline(&backend);
    let rect = TileRect::new(256, 0, 256, 256);

    let tile = pipeline
        .tile(&doc(), 1, 612, rect, CancellationToken::new(), Priority::VISIBLE)
        .await
        .unwrap();
    assert_eq!(tile.rect, rect);
    assert_eq!(tile.bitmap.dimensions(), (256, 256));

    let again = pipeline
        .tile(&doc(), 1, 612, rect, CancellationToken::new(), Priority::VISIBLE)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&tile.bitmap, &again.bitmap));
    assert_eq!(
        backend.calls(),
        vec![Call::Tile {
            doc: "book.pdf".to_string(),
            page: 1,
            width: 612,
            rect,
        }]
    );
}

#[tokio::test]
async fn test_document_data_is_cached() {
    let backend = Arc::new(ScriptedBackend::new().with_document("book.pdf", 4));
    let pipeline = pipeline(&backend);

    for _ in 0..2 {
        let info = pipeline
            .info(&doc(), CancellationToken::new(), Priority::VISIBLE)
            .await
            .unwrap();
        assert_eq!(info.page_count, 4);

        let text = pipeline
            .text(&doc(), 2, CancellationToken::new(), Priority::IDLE)
            .await
            .unwrap();
        assert_eq!(text.items[0].text, "page 3");

        let bookmarks = pipeline
            .bookmarks(&doc(), CancellationToken::new(), Priority::IDLE)
            .await
            .unwrap();
        assert_eq!(bookmarks.len(), 4);

        let annotations = pipeline
            .annotations(&doc(), CancellationToken::new(), Priority::IDLE)
            .await
            .unwrap();
        assert_eq!(annotations[0].subtype, "highlight");
    }

    assert_eq!(backend.call_count(), 4);
}

#[tokio::test]
async fn test_unknown_document_fails() {
    let backend = Arc::new(ScriptedBackend::new());
    let pipeline = pipeline(&backend);

    let result = pipeline
        .info(&doc(), CancellationToken::new(), Priority::VISIBLE)
        .await;
    assert_eq!(
        result,
        Err(RenderError::Backend("document not open: book.pdf".to_string()))
    );
}
