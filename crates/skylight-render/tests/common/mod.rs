//! Shared setup for tests that talk to a render host over in-process
//! endpoints.

#![allow(dead_code)]

use skylight_host::{HostConfig, NullBackend, RenderHost};
use skylight_ipc::{EndpointNames, LocalNamespace, Transport, TransportConfig, TransportListener};
use skylight_protocol::{
    CommandType, Message, RenderBackendType, RenderCommand, RenderRect, RenderResult,
    SystemCapabilities, WindowHandle,
};
use skylight_render::{BackendProxy, Connection, ProxyConfig};
use std::sync::Arc;
use std::time::Duration;

pub const WINDOW: WindowHandle = WindowHandle(0x2000);

pub fn bounds() -> RenderRect {
    RenderRect::new(0, 0, 200, 100)
}

/// A connection served by a real [`RenderHost`].
pub struct HostHarness {
    pub host: RenderHost,
    pub connection: Connection,
    _listener: TransportListener,
}

impl HostHarness {
    pub fn start(suffix: &str) -> Self {
        Self::start_with(suffix, HostConfig { metrics_interval_ms: 0, ..HostConfig::default() }, None)
    }

    pub fn start_with(
        suffix: &str,
        config: HostConfig,
        capabilities: Option<SystemCapabilities>,
    ) -> Self {
        let ns = LocalNamespace::new();
        let names = EndpointNames::with_suffix(suffix);
        let listener = TransportListener::bind(&ns, &names, config.transport.clone()).unwrap();

        let backend = match capabilities {
            Some(caps) => NullBackend::new(caps),
            None => NullBackend::default(),
        };
        let host = RenderHost::with_backend(config, Box::new(backend)).unwrap();

        let connection = Connection::connect(
            &ns,
            &names,
            TransportConfig::default(),
            ProxyConfig::default(),
        )
        .unwrap();
        assert!(host.accept(&listener, Duration::from_secs(5)).unwrap());

        Self {
            host,
            connection,
            _listener: listener,
        }
    }
}

/// A connection served by a hand-driven transport. Initialize commands are
/// answered with success; everything else goes to the script.
pub struct ScriptedHarness {
    pub server: Arc<Transport>,
    pub connection: Connection,
    _listener: TransportListener,
}

impl ScriptedHarness {
    /// Peer that acknowledges Initialize and ignores everything else.
    pub fn silent(suffix: &str) -> Self {
        Self::start(suffix, |_, _| {})
    }

    pub fn start(
        suffix: &str,
        script: impl Fn(Arc<Transport>, RenderCommand) + Send + Sync + 'static,
    ) -> Self {
        let ns = LocalNamespace::new();
        let names = EndpointNames::with_suffix(suffix);
        let listener = TransportListener::bind(&ns, &names, TransportConfig::default()).unwrap();

        let server = Arc::new(Transport::new(TransportConfig::default()));
        let weak = Arc::downgrade(&server);
        server.on_message(move |message| {
            let (Message::Command(command), Some(server)) = (message, weak.upgrade()) else {
                return;
            };
            if command.command_type() == CommandType::Initialize {
                let reply = RenderResult::success(command.command_id, command.widget_id);
                let _ = server.send(&Message::Result(reply));
            } else {
                script(server, command);
            }
        });

        let connection = Connection::connect(
            &ns,
            &names,
            TransportConfig::default(),
            ProxyConfig::default(),
        )
        .unwrap();
        assert!(listener.accept(&server, Duration::from_secs(5)).unwrap());

        Self {
            server,
            connection,
            _listener: listener,
        }
    }
}

/// Proxy initialized on `connection`, ready for content operations.
pub async fn ready_proxy(connection: &Connection) -> BackendProxy {
    let proxy = connection.create_proxy();
    let result = proxy
        .initialize_async(RenderBackendType::Auto, WINDOW, bounds())
        .await;
    assert!(result.is_success(), "initialize failed: {:?}", result);
    proxy
}
