//! Process-wide default transport.
//!
//! The default is built lazily on first use. Swapping it never affects
//! requests already issued: the previous instance is kept alive until all
//! of its outstanding requests have resolved, and any other holder of its
//! `Arc` may keep using it after that.

use std::sync::{Arc, Mutex, PoisonError};

use crate::config::TransportConfig;
use crate::engine::TcpEngine;
use crate::error::TransportError;
use crate::transport::dispatcher::{Dispatcher, DispatcherConfig};
use crate::transport::handle::PooledHandleFactory;
use crate::transport::HttpTransport;

static DEFAULT_TRANSPORT: Mutex<Option<Arc<dyn HttpTransport>>> = Mutex::new(None);

/// Builds a dispatcher over the TCP engine, configured from the environment.
pub fn new_default_transport() -> Result<Arc<dyn HttpTransport>, TransportError> {
    let config = TransportConfig::load();
    let engine = TcpEngine::new().map_err(|e| {
        TransportError::internal(format!("Failed to start transfer engine: {e}"))
    })?;
    let factory = Arc::new(PooledHandleFactory::from_config(&config));
    let dispatcher = Dispatcher::new(engine, factory, DispatcherConfig::from(&config))
        .map_err(|e| TransportError::internal(format!("Failed to start dispatcher: {e}")))?;
    Ok(Arc::new(dispatcher))
}

/// Returns the process-wide transport, creating it on first call.
pub fn default_transport() -> Result<Arc<dyn HttpTransport>, TransportError> {
    let mut slot = DEFAULT_TRANSPORT
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(transport) = slot.as_ref() {
        return Ok(Arc::clone(transport));
    }
    let transport = new_default_transport()?;
    *slot = Some(Arc::clone(&transport));
    Ok(transport)
}

/// Replaces the process-wide transport. `None` installs a freshly built
/// default. Mostly useful for injecting a mock in tests.
pub fn set_default_transport(
    transport: Option<Arc<dyn HttpTransport>>,
) -> Result<(), TransportError> {
    let transport = match transport {
        Some(t) => t,
        None => new_default_transport()?,
    };
    let previous = DEFAULT_TRANSPORT
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(transport);
    if let Some(previous) = previous {
        retire(previous);
    }
    Ok(())
}

/// Releases a replaced default once its outstanding requests have resolved.
///
/// Releasing the last reference to a dispatcher shuts it down, so the wait
/// happens on a separate thread and the caller is never blocked.
fn retire(previous: Arc<dyn HttpTransport>) {
    let spawned = std::thread::Builder::new()
        .name("courier-retire".to_string())
        .spawn(move || {
            previous.wait_idle();
            drop(previous);
        });
    if let Err(e) = spawned {
        // The closure, and the transport with it, is dropped right here.
        tracing::warn!(error = %e, "Failed to spawn retirement thread for previous transport");
    }
}
