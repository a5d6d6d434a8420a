//! Accepting side of the transport, used by the render process.

use crate::config::{EndpointNames, TransportConfig};
use crate::endpoint::{EndpointListener, Endpoints};
use crate::error::{IpcError, ProtocolError};
use crate::transport::{read_hello, Transport};
use std::time::Duration;
use tracing::{info, warn};

pub struct TransportListener {
    names: EndpointNames,
    config: TransportConfig,
    control: Box<dyn EndpointListener>,
    bulk: Box<dyn EndpointListener>,
}

impl TransportListener {
    /// Listen on both endpoint names.
    pub fn bind(
        endpoints: &dyn Endpoints,
        names: &EndpointNames,
        config: TransportConfig,
    ) -> Result<Self, IpcError> {
        let bind = |name: &str| {
            endpoints.bind(name).map_err(|source| IpcError::Connect {
                name: name.to_string(),
                source,
            })
        };
        let control = bind(&names.control_pipe)?;
        let bulk = bind(&names.shared_memory)?;
        info!(
            "Listening on {} / {}",
            names.control_pipe, names.shared_memory
        );
        Ok(Self {
            names: names.clone(),
            config,
            control,
            bulk,
        })
    }

    pub fn names(&self) -> &EndpointNames {
        &self.names
    }

    /// Wait up to `timeout` for a client and attach it to `transport`.
    /// Returns `Ok(false)` if nobody connected in time.
    pub fn accept(&self, transport: &Transport, timeout: Duration) -> Result<bool, IpcError> {
        let Some(mut control) = self.control.accept(timeout)? else {
            return Ok(false);
        };
        let max = self.config.max_frame_bytes;

        let control_token = match read_hello(&mut control.reader, max) {
            Ok(token) => token,
            Err(e) => {
                control.close();
                return Err(e);
            }
        };

        let Some(mut bulk) = self.bulk.accept(self.config.connect_timeout())? else {
            control.close();
            warn!("Client on {} never opened the bulk channel", self.names.control_pipe);
            return Err(IpcError::ConnectionLost("bulk channel never connected".into()));
        };
        let bulk_token = match read_hello(&mut bulk.reader, max) {
            Ok(token) => token,
            Err(e) => {
                control.close();
                bulk.close();
                return Err(e);
            }
        };
        if control_token != bulk_token {
            control.close();
            bulk.close();
            return Err(ProtocolError::HandshakeMismatch.into());
        }

        transport.attach(control, bulk)?;
        info!("Accepted connection on {}", self.names.control_pipe);
        Ok(true)
    }
}
