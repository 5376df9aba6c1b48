use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
    middleware,
    routing::{get, post},
};
use metrics_util::debugging::DebuggingRecorder;
use output_cache::cache::{
    ActionDescriptor, CachePolicy, ControllerDescriptor, EndpointPolicy, InvalidationRule,
    OutputCache, OutputCacheConfig, invalidation_layer, output_cache_layer,
};
use tower::ServiceExt;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let cache = OutputCache::new(OutputCacheConfig::default());
    let controller = ControllerDescriptor::new("Tags").with_action(ActionDescriptor::new("Get"));
    let cached = cache.endpoint(
        &controller,
        "Get",
        EndpointPolicy::new(CachePolicy::fixed(60, 60)),
    );
    let skipped = cache.endpoint(&controller, "GetDrafts", EndpointPolicy::ignored());
    let invalidation = cache.invalidation(&controller, "Post", vec![InvalidationRule::auto()]);

    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = Arc::clone(&calls);
    let app = Router::new()
        .route(
            "/tags/{slug}",
            get(move || {
                let calls = Arc::clone(&handler_calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "tag"
                }
            })
            .layer(middleware::from_fn_with_state(cached, output_cache_layer)),
        )
        .route(
            "/drafts",
            get(|| async { "draft" })
                .layer(middleware::from_fn_with_state(skipped, output_cache_layer)),
        )
        .route(
            "/tags",
            post(|| async { StatusCode::CREATED })
                .layer(middleware::from_fn_with_state(invalidation, invalidation_layer)),
        );

    for (method, uri) in [
        (Method::GET, "/tags/one"),
        (Method::GET, "/tags/one"),
        (Method::GET, "/tags/two"),
        (Method::GET, "/drafts"),
        (Method::POST, "/tags"),
    ] {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build");
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        assert!(response.status().is_success());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    cache.memory_store().purge_expired();

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "output_cache_hit_total",
        "output_cache_miss_total",
        "output_cache_store_total",
        "output_cache_skip_total",
        "output_cache_invalidate_total",
        "output_cache_entries",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
