//! Timeouts, lost connections and late results against a scripted peer.

mod common;

use common::{bounds, ready_proxy, HostHarness, ScriptedHarness, WINDOW};
use skylight_protocol::{
    CommandType, ContentParameters, Message, RenderBackendType, RenderProperties, RenderRect,
    RenderResult,
};
use skylight_render::{DiagnosticsSink, FaultReport, ProxyError, ProxyState};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct CollectingSink {
    reports: Mutex<Vec<FaultReport>>,
}

impl DiagnosticsSink for CollectingSink {
    fn capture(&self, report: &FaultReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unanswered_operation_times_out_at_deadline() {
    let harness = ScriptedHarness::silent("timeout");
    let proxy = ready_proxy(&harness.connection).await;
    assert_eq!(proxy.default_timeout(), Duration::from_millis(5000));

    let started = Instant::now();
    let pending = proxy.resize_async(RenderRect::new(0, 0, 640, 480));
    assert_eq!(proxy.pending_count(), 1);

    let result = pending.await;
    let elapsed = started.elapsed();
    assert!(result.is_timeout(), "{:?}", result);
    assert!(elapsed >= Duration::from_millis(5000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(5500), "{:?}", elapsed);

    assert_eq!(proxy.pending_count(), 0);
    assert_eq!(proxy.stats().timed_out, 1);
    assert_eq!(proxy.render_bounds(), bounds());
    assert!(proxy.is_ready());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_severed_connection_fails_all_pending_operations() {
    let harness = ScriptedHarness::silent("severed");
    let sink = Arc::new(CollectingSink::default());
    harness.connection.set_diagnostics_sink(sink.clone());
    let proxy = ready_proxy(&harness.connection).await;

    let errors = Arc::new(Mutex::new(Vec::new()));
    let collected = errors.clone();
    proxy.set_error_callback(move |e| collected.lock().unwrap().push(e.clone()));

    let pending = vec![
        proxy.render_frame_async(ContentParameters::static_content("a"), RenderProperties::default()),
        proxy.resize_async(RenderRect::new(0, 0, 320, 200)),
        proxy.update_content_async(ContentParameters::static_content("b")),
    ];
    assert_eq!(proxy.pending_count(), 3);

    harness.server.close();

    for op in pending {
        let result = tokio::time::timeout(Duration::from_secs(1), op)
            .await
            .expect("pending operation not failed after disconnect");
        assert!(result.is_connection_lost(), "{:?}", result);
    }

    assert_eq!(proxy.state(), ProxyState::Faulted);
    assert_eq!(proxy.pending_count(), 0);
    assert!(!proxy.is_process_alive());
    assert_eq!(proxy.stats().connection_lost, 3);
    assert_eq!(harness.connection.late_results(), 0);

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ProxyError::ConnectionLost(_)));

    let reports = sink.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].widget_id, proxy.widget_id());
    assert_eq!(reports[0].pending_failed, 3);

    let after = proxy.resize_async(RenderRect::new(0, 0, 10, 10)).await;
    assert!(!after.is_success());
    assert_eq!(after.command_id.0, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_liveness_loss_faults_every_proxy() {
    let harness = ScriptedHarness::silent("liveness");
    let first = ready_proxy(&harness.connection).await;
    let second = ready_proxy(&harness.connection).await;

    let pending = first.resize_async(RenderRect::new(0, 0, 50, 50));
    harness.connection.notify_liveness(false);

    assert!(pending.await.is_connection_lost());
    assert_eq!(first.state(), ProxyState::Faulted);
    assert_eq!(second.state(), ProxyState::Faulted);
    assert!(!harness.connection.is_process_alive());
    assert!(!harness.connection.is_connected());

    // Faulted proxies can still be destroyed, locally
    assert!(second.destroy_async().await.is_success());
    assert_eq!(second.state(), ProxyState::Destroyed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_late_result_is_discarded() {
    let harness = ScriptedHarness::start("late", |server, command| {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            let _ = server.send(&Message::Result(RenderResult::success(
                command.command_id,
                command.widget_id,
            )));
        });
    });
    let proxy = ready_proxy(&harness.connection).await;
    proxy.set_default_timeout(Duration::from_millis(100));

    let result = proxy.resize_async(RenderRect::new(0, 0, 999, 999)).await;
    assert!(result.is_timeout());

    let deadline = Instant::now() + Duration::from_secs(5);
    while harness.connection.late_results() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.connection.late_results(), 1);
    assert_eq!(proxy.render_bounds(), bounds());
    assert_eq!(proxy.stats().succeeded, 1);
    assert!(proxy.is_ready());
}

#[test]
fn test_blocking_render_frame_is_bounded() {
    let harness = ScriptedHarness::silent("bounded");
    let proxy = harness.connection.create_proxy();
    assert!(proxy
        .initialize_async(RenderBackendType::Auto, WINDOW, bounds())
        .wait()
        .is_success());

    let started = Instant::now();
    let result = proxy.render_frame(
        ContentParameters::static_content("slow"),
        RenderProperties::default(),
        Duration::from_millis(200),
    );
    let elapsed = started.elapsed();
    assert!(result.is_timeout());
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2));
    assert_eq!(proxy.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_destroy_timeout_resolves_remaining_operations() {
    let harness = ScriptedHarness::silent("destroy-timeout");
    let proxy = ready_proxy(&harness.connection).await;
    proxy.set_default_timeout(Duration::from_millis(200));

    let (tx, rx) = crossbeam_channel::bounded(1);
    let blocking = proxy.clone();
    let started = Instant::now();
    thread::spawn(move || {
        let result = blocking.render_frame(
            ContentParameters::static_content("clock"),
            RenderProperties::default(),
            Duration::from_secs(2),
        );
        let _ = tx.send((result, started.elapsed()));
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while proxy.pending_count() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(proxy.pending_count(), 1);

    let destroy = proxy.destroy_async().await;
    assert!(destroy.is_timeout(), "{:?}", destroy);
    assert_eq!(proxy.state(), ProxyState::Destroyed);
    assert_eq!(proxy.pending_count(), 0);

    let (render, elapsed) = rx
        .recv_timeout(Duration::from_secs(1))
        .expect("blocking render still waiting after destroy");
    assert!(!render.is_success());
    assert!(!render.is_timeout());
    assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
    assert_eq!(proxy.stats().timed_out, 1);
    assert!(harness.connection.live_widgets().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_orderly_close_skips_diagnostics() {
    let harness = HostHarness::start("orderly-close");
    let sink = Arc::new(CollectingSink::default());
    harness.connection.set_diagnostics_sink(sink.clone());
    let proxy = ready_proxy(&harness.connection).await;

    harness.connection.close();
    assert_eq!(proxy.state(), ProxyState::Faulted);
    assert!(sink.reports.lock().unwrap().is_empty());

    let rejected = proxy
        .render_frame_async(ContentParameters::default(), RenderProperties::default())
        .await;
    assert!(!rejected.is_success());
    assert_eq!(harness.host.received_commands(proxy.widget_id()).len(), 1);
    assert_eq!(
        harness.host.received_commands(proxy.widget_id())[0].1,
        CommandType::Initialize
    );
}

