//! Transfer handles and the factory that hands them out.
//!
//! A [`TransferHandle`] is the configured description of one network
//! operation. The factory creates handles and takes them back when the
//! request is finished; [`PooledHandleFactory`] recycles released handles
//! instead of discarding them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::config::TransportConfig;
use crate::error::TransportError;

/// Options a transfer engine reads when a handle is admitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOptions {
    pub url: String,
    /// Verb sent on the wire.
    pub method: String,
    /// Header lines in `name: value` form.
    pub headers: Vec<String>,
    pub accept_encoding: bool,
    pub user_agent: String,
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    /// `Some(len)` switches the transfer to streaming upload via the read callback.
    pub upload_size: Option<u64>,
    /// Never send a body-less response's body (HEAD).
    pub no_body: bool,
    pub verbose: bool,
    /// Close the underlying connection instead of returning it to the pool.
    pub forbid_reuse: bool,
}

/// One configurable unit of transfer work.
#[derive(Debug)]
pub struct TransferHandle {
    id: u64,
    pub options: TransferOptions,
}

impl TransferHandle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            options: TransferOptions::default(),
        }
    }

    /// Stable identity of this handle across recycles.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Clears every option so the handle can be configured afresh.
    pub fn reset(&mut self) {
        self.options = TransferOptions::default();
    }
}

/// Source of transfer handles.
///
/// `cleanup_handle` must be called exactly once for every handle returned
/// by `create_handle`, whether the request succeeded, failed, or was never
/// admitted.
pub trait HandleFactory: Send + Sync {
    fn create_handle(&self) -> Result<TransferHandle, TransportError>;

    fn cleanup_handle(&self, handle: TransferHandle);
}

/// Default factory: keeps up to `max_idle` released handles for reuse and
/// optionally caps the number of live handles.
#[derive(Debug)]
pub struct PooledHandleFactory {
    idle: Mutex<Vec<TransferHandle>>,
    max_idle: usize,
    max_live: usize,
    live: AtomicUsize,
    next_id: AtomicU64,
    created: AtomicU64,
    recycled: AtomicU64,
}

impl PooledHandleFactory {
    /// `max_live == 0` means unlimited.
    pub fn new(max_idle: usize, max_live: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            max_live,
            live: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.max_idle_handles, config.max_handles)
    }

    /// Handles currently checked out.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Handles currently parked for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Handles built from scratch since construction.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Handles handed out from the idle pool since construction.
    pub fn recycled(&self) -> u64 {
        self.recycled.load(Ordering::Relaxed)
    }
}

impl Default for PooledHandleFactory {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

impl HandleFactory for PooledHandleFactory {
    fn create_handle(&self) -> Result<TransferHandle, TransportError> {
        let reserved = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (self.max_live == 0 || live < self.max_live).then_some(live + 1)
            });
        if reserved.is_err() {
            return Err(TransportError::unavailable(format!(
                "transfer handle limit of {} reached",
                self.max_live
            )));
        }

        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match reused {
            Some(handle) => {
                self.recycled.fetch_add(1, Ordering::Relaxed);
                Ok(handle)
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Ok(TransferHandle::new(
                    self.next_id.fetch_add(1, Ordering::Relaxed),
                ))
            }
        }
    }

    fn cleanup_handle(&self, mut handle: TransferHandle) {
        handle.reset();
        {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            if idle.len() < self.max_idle {
                idle.push(handle);
            }
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}
