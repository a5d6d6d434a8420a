//! Proxies driving a real render host.

mod common;

use common::{bounds, ready_proxy, HostHarness, WINDOW};
use skylight_host::{HostConfig, NullBackend};
use skylight_protocol::{
    CaptureRequest, CommandId, CommandType, ContentParameters, ImageFormat, RenderBackendType,
    RenderProperties, RenderRect, RenderResultStatus, SystemCapabilities, WidgetId,
};
use skylight_render::{ProxyError, ProxyState};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn test_every_command_gets_exactly_one_result() {
    let harness = HostHarness::start("exactly-once");
    let proxy = ready_proxy(&harness.connection).await;

    let mut pending = Vec::new();
    for i in 0..20 {
        pending.push(proxy.render_frame_async(
            ContentParameters::static_content(format!("frame {}", i)),
            RenderProperties::default(),
        ));
        pending.push(proxy.resize_async(RenderRect::new(0, 0, 200 + i, 100)));
    }
    pending.push(proxy.update_content_async(ContentParameters::web("https://example.com/feed")));
    pending.push(proxy.set_properties_async(RenderProperties {
        opacity: 0.5,
        ..RenderProperties::default()
    }));

    let mut seen = HashSet::new();
    for op in pending {
        let id = op.command_id();
        let result = op.await;
        assert!(result.is_success(), "{:?}", result);
        assert_eq!(result.command_id, id);
        assert!(seen.insert(id), "{} resolved twice", id);
    }

    assert_eq!(seen.len(), 42);
    assert_eq!(proxy.pending_count(), 0);
    assert_eq!(harness.connection.late_results(), 0);
    // 42 operations plus the initialize
    assert_eq!(harness.host.stats().commands_executed, 43);
    assert_eq!(proxy.stats().succeeded, 43);
    assert_eq!(proxy.render_bounds(), RenderRect::new(0, 0, 219, 100));
    assert_eq!(proxy.current_properties().opacity, 0.5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_render_then_resize_reach_host_in_issue_order() {
    let harness = HostHarness::start("ordering");
    let proxy = harness.connection.create_proxy_for(WidgetId(7)).unwrap();
    assert!(proxy
        .initialize_async(RenderBackendType::Auto, WINDOW, bounds())
        .await
        .is_success());

    let render = proxy.render_frame_async(
        ContentParameters::static_content("clock"),
        RenderProperties::default(),
    );
    let resize = proxy.resize_async(RenderRect::new(10, 10, 300, 150));
    let (render_id, resize_id) = (render.command_id(), resize.command_id());
    assert!(render_id < resize_id);

    let (render, resize) = tokio::join!(render, resize);
    assert!(render.is_success());
    assert!(resize.is_success());

    let received = harness.host.received_commands(WidgetId(7));
    assert_eq!(
        &received[1..],
        &[
            (render_id, CommandType::RenderFrame),
            (resize_id, CommandType::Resize)
        ]
    );
    assert_eq!(proxy.state(), ProxyState::Ready);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_capture_returns_image_over_bulk_channel() {
    let harness = HostHarness::start("capture");
    let proxy = ready_proxy(&harness.connection).await;

    let result = proxy
        .capture_frame_async(CaptureRequest {
            format: ImageFormat::Bmp,
            path: None,
        })
        .await;
    assert!(result.is_success(), "{:?}", result);
    assert_eq!(&result.data[..2], b"BM");
    assert_eq!(result.data.len(), 54 + 200 * 100 * 4);
    assert!(harness.connection.transport().stats().bulk_received >= 1);

    let png = proxy.capture_frame_async(CaptureRequest::default()).await;
    assert_eq!(png.status, RenderResultStatus::BackendNotSupported);
    assert_eq!(proxy.state(), ProxyState::Ready);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_capture_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("widget.bmp");
    let harness = HostHarness::start("capture-file");
    let proxy = ready_proxy(&harness.connection).await;

    let result = proxy
        .capture_frame_async(CaptureRequest {
            format: ImageFormat::Bmp,
            path: Some(path.display().to_string()),
        })
        .await;
    assert!(result.is_success());
    assert!(result.data.is_empty());
    assert!(path.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_query_capabilities() {
    let harness = HostHarness::start("capabilities");
    let proxy = ready_proxy(&harness.connection).await;
    assert!(proxy.supported_backends().is_empty());

    assert!(proxy.query_capabilities_async().await.is_success());
    assert_eq!(proxy.capabilities(), Some(NullBackend::default_capabilities()));
    assert_eq!(
        proxy.supported_backends(),
        vec![
            RenderBackendType::SkiaSharp,
            RenderBackendType::Direct3D,
            RenderBackendType::WebView
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsupported_backend_reported_through_error_callback() {
    let caps = SystemCapabilities {
        supports_skia: true,
        ..SystemCapabilities::default()
    };
    let harness = HostHarness::start_with(
        "unsupported",
        HostConfig {
            metrics_interval_ms: 0,
            ..HostConfig::default()
        },
        Some(caps),
    );

    let proxy = harness.connection.create_proxy();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    proxy.set_error_callback(move |e| sink.lock().unwrap().push(e.clone()));

    let result = proxy
        .initialize_async(RenderBackendType::WebView, WINDOW, bounds())
        .await;
    assert_eq!(result.status, RenderResultStatus::BackendNotSupported);
    assert_eq!(proxy.state(), ProxyState::Uninitialized);

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ProxyError::CommandFailed {
            command_type: CommandType::Initialize,
            status: RenderResultStatus::BackendNotSupported,
            ..
        }
    ));

    assert!(proxy
        .initialize_async(RenderBackendType::Auto, WINDOW, bounds())
        .await
        .is_success());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_switch_backend_and_destroy() {
    let harness = HostHarness::start("switch");
    let proxy = ready_proxy(&harness.connection).await;

    assert!(proxy
        .switch_backend_async(RenderBackendType::WebView)
        .await
        .is_success());
    assert_eq!(proxy.current_backend(), RenderBackendType::WebView);

    // Already on the requested backend: resolved without a round trip
    let same = proxy.switch_backend_async(RenderBackendType::WebView).await;
    assert!(same.is_success());
    assert_eq!(same.command_id, CommandId(0));

    assert!(proxy.destroy_async().await.is_success());
    assert_eq!(proxy.state(), ProxyState::Destroyed);
    assert_eq!(harness.host.stats().widgets, 0);
    assert!(harness.connection.live_widgets().is_empty());

    let after = proxy
        .render_frame_async(ContentParameters::default(), RenderProperties::default())
        .await;
    assert_eq!(after.command_id, CommandId(0));
    assert!(!after.is_success());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_content_errors_keep_proxy_ready() {
    let harness = HostHarness::start("content-error");
    let proxy = ready_proxy(&harness.connection).await;

    let mut bad = ContentParameters::file("/srv/widgets/clock.html");
    bad.source_url.clear();
    let result = proxy
        .render_frame_async(bad, RenderProperties::default())
        .await;
    assert_eq!(result.status, RenderResultStatus::ContentLoadError);
    assert!(proxy.is_ready());
    assert_eq!(proxy.stats().failed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_performance_callback_receives_host_metrics() {
    let harness = HostHarness::start_with(
        "metrics",
        HostConfig {
            metrics_interval_ms: 20,
            ..HostConfig::default()
        },
        None,
    );
    let proxy = ready_proxy(&harness.connection).await;

    let (tx, rx) = crossbeam_channel::unbounded();
    proxy.set_performance_callback(
        move |metrics| {
            let _ = tx.send(metrics.clone());
        },
        Duration::ZERO,
    );
    assert!(proxy
        .render_frame_async(ContentParameters::static_content("cpu"), RenderProperties::default())
        .await
        .is_success());

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let metrics = rx
            .recv_timeout(deadline.saturating_duration_since(std::time::Instant::now()))
            .expect("no metrics with a rendered frame");
        if metrics.total_frames >= 1 {
            break;
        }
    }
    assert!(proxy.performance_metrics().total_frames >= 1);
    assert!(harness.host.stats().metrics_sent > 0);
}

#[test]
fn test_blocking_render_frame() {
    let harness = HostHarness::start("blocking");
    let proxy = harness.connection.create_proxy();
    assert!(proxy
        .initialize_async(RenderBackendType::Auto, WINDOW, bounds())
        .wait()
        .is_success());

    let result = proxy.render_frame(
        ContentParameters::static_content("weather"),
        RenderProperties::default(),
        Duration::from_secs(5),
    );
    assert!(result.is_success());
    assert_eq!(result.frame_count, 1);
    assert_eq!(proxy.pending_count(), 0);
}

#[test]
fn test_connection_check_round_trip() {
    let harness = HostHarness::start("connection-check");
    assert!(harness.connection.test_connection());

    harness.host.shutdown();
    assert!(!harness.connection.test_connection());
}
