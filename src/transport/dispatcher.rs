//! # Dispatcher: the transport control loop
//!
//! A [`Dispatcher`] owns one background thread that drives every request it
//! is given through a [`TransferEngine`]. Callers never block on network
//! activity: [`Dispatcher::issue_request`] queues the request and returns a
//! future immediately.
//!
//! ```text
//! loop {
//!     1. Take the pending queue (under the lock). Idle and nothing queued?
//!        Wait on the condvar until work or shutdown arrives.
//!     2. Admit each queued request, skipping those nobody waits for.
//!        During shutdown, fail them instead.
//!     3. Shutdown and nothing active? Exit.
//!     4. perform() at most `max_perform_passes` times.
//!     5. Drain every completion and finalize it.
//!     6. Anything still active? poll() for readiness, bounded by
//!        `poll_timeout` and interrupted by the engine wakeup.
//! }
//! ```
//!
//! The mutex only guards the queue, the active count and the shutdown flag.
//! It is never held across an engine call.
//!
//! Fairness: every iteration admits the whole queue before doing any
//! network work, and the perform phase is bounded, so a new request waits
//! at most one bounded perform phase, one drain and one interrupted poll
//! before it is admitted.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::config::{verbose_enabled, TransportConfig};
use crate::error::TransportError;
use crate::http::HttpRequest;
use crate::transport::engine::{
    Completion, EngineCode, EngineError, Progress, Token, TransferCallbacks, TransferEngine,
    Wakeup,
};
use crate::transport::future::{promise_future_pair, ResponseFuture};
use crate::transport::handle::HandleFactory;
use crate::transport::state::RequestState;
use crate::transport::HttpTransport;

/// Loop tuning derived from [`TransportConfig`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_perform_passes: usize,
    pub poll_timeout: Duration,
    pub shutdown_grace: Duration,
    pub user_agent_suffix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for DispatcherConfig {
    fn from(config: &TransportConfig) -> Self {
        Self {
            max_perform_passes: config.max_perform_passes.max(1),
            poll_timeout: config.poll_timeout(),
            shutdown_grace: config.shutdown_grace(),
            user_agent_suffix: config.user_agent_suffix.clone(),
        }
    }
}

struct SharedState {
    pending: Vec<RequestState>,
    active: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<SharedState>,
    work_ready: Condvar,
    /// Signalled whenever nothing is queued or active.
    drained: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_active(&self, active: usize) {
        let mut state = self.lock();
        state.active = active;
        if active == 0 && state.pending.is_empty() {
            self.drained.notify_all();
        }
    }
}

/// Multiplexes concurrent requests over one transfer engine.
pub struct Dispatcher {
    shared: Arc<Shared>,
    waker: Arc<dyn Wakeup>,
    factory: Arc<dyn HandleFactory>,
    config: DispatcherConfig,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Starts the control thread. The engine moves onto that thread and is
    /// dropped there once the loop exits.
    pub fn new<E: TransferEngine>(
        engine: E,
        factory: Arc<dyn HandleFactory>,
        config: DispatcherConfig,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SharedState {
                pending: Vec::new(),
                active: 0,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            drained: Condvar::new(),
        });
        let waker = engine.waker();

        let control = ControlLoop {
            engine,
            shared: Arc::clone(&shared),
            active: ActiveTable::default(),
            next_token: 0,
            max_perform_passes: config.max_perform_passes,
            poll_timeout: config.poll_timeout,
            shutdown_grace: config.shutdown_grace,
        };
        let thread = std::thread::Builder::new()
            .name("courier-dispatcher".to_string())
            .spawn(move || control.run())?;

        Ok(Self {
            shared,
            waker,
            factory,
            config,
            thread: Some(thread),
        })
    }

    /// Queues a request and returns its future without touching the network.
    ///
    /// Zero or `None` timeouts mean no timeout.
    pub fn issue_request(
        &self,
        request: &HttpRequest,
        payload: Bytes,
        request_timeout: Option<Duration>,
        connect_timeout: Option<Duration>,
    ) -> ResponseFuture {
        let (promise, future) = promise_future_pair();
        let mut state = match RequestState::new(Arc::clone(&self.factory), promise) {
            Ok(state) => state,
            Err((error, promise)) => {
                tracing::warn!(
                    url = %request.url,
                    error = %error,
                    "Failed to create transfer handle"
                );
                promise.set_result(Err(error));
                return future;
            }
        };
        state.setup(
            request,
            payload,
            request_timeout,
            connect_timeout,
            &self.config.user_agent_suffix,
            verbose_enabled(),
        );

        {
            let mut shared = self.shared.lock();
            if shared.shutdown {
                drop(shared);
                state.fail(TransportError::unavailable("transport is shutting down"));
                return future;
            }
            shared.pending.push(state);
        }
        self.shared.work_ready.notify_one();
        self.waker.wake();
        future
    }

    /// Requests queued or in flight right now.
    pub fn in_flight(&self) -> usize {
        let shared = self.shared.lock();
        shared.pending.len() + shared.active
    }

    /// Blocks until every request issued so far has resolved.
    pub fn wait_idle(&self) {
        let mut shared = self.shared.lock();
        while !shared.pending.is_empty() || shared.active > 0 {
            shared = self
                .shared
                .drained
                .wait(shared)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl HttpTransport for Dispatcher {
    fn issue_request(
        &self,
        request: &HttpRequest,
        payload: Bytes,
        request_timeout: Option<Duration>,
        connect_timeout: Option<Duration>,
    ) -> ResponseFuture {
        Dispatcher::issue_request(self, request, payload, request_timeout, connect_timeout)
    }

    fn wait_idle(&self) {
        Dispatcher::wait_idle(self);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.work_ready.notify_all();
        self.waker.wake();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Dispatcher thread panicked");
            }
        }
    }
}

/// Admitted requests, addressed by token. The engine reaches request state
/// only through this table.
#[derive(Default)]
struct ActiveTable {
    states: HashMap<Token, RequestState>,
}

impl TransferCallbacks for ActiveTable {
    fn on_write(&mut self, token: Token, data: &[u8]) -> usize {
        self.states.get_mut(&token).map_or(0, |s| s.write(data))
    }

    fn on_read(&mut self, token: Token, buf: &mut [u8]) -> usize {
        self.states.get_mut(&token).map_or(0, |s| s.read(buf))
    }

    fn on_header(&mut self, token: Token, line: &[u8]) -> usize {
        self.states.get_mut(&token).map_or(0, |s| s.header(line))
    }
}

struct ControlLoop<E> {
    engine: E,
    shared: Arc<Shared>,
    active: ActiveTable,
    next_token: u64,
    max_perform_passes: usize,
    poll_timeout: Duration,
    shutdown_grace: Duration,
}

impl<E: TransferEngine> ControlLoop<E> {
    fn run(mut self) {
        let mut shutdown_deadline: Option<Option<Instant>> = None;

        loop {
            let (pending, shutdown) = self.take_pending();

            if !pending.is_empty() {
                for state in pending {
                    if shutdown {
                        Self::reject_at_shutdown(state);
                    } else {
                        self.admit(state);
                    }
                }
                self.shared.set_active(self.active.states.len());
            }

            if shutdown {
                if self.active.states.is_empty() {
                    break;
                }
                if shutdown_deadline.is_none() {
                    tracing::debug!(
                        active = self.active.states.len(),
                        "Shutdown requested; waiting for active transfers"
                    );
                    // An unrepresentable deadline means waiting indefinitely.
                    shutdown_deadline = Some(Instant::now().checked_add(self.shutdown_grace));
                }
                if shutdown_deadline
                    .flatten()
                    .is_some_and(|deadline| Instant::now() >= deadline)
                {
                    self.abort_all();
                    break;
                }
            }

            let mut passes = 0;
            while passes < self.max_perform_passes
                && self.engine.perform(&mut self.active) == Progress::Again
            {
                passes += 1;
            }

            let mut finished = 0;
            while let Some(completion) = self.engine.next_completion() {
                self.finish(completion);
                finished += 1;
            }
            if finished > 0 {
                self.shared.set_active(self.active.states.len());
            }

            if !self.active.states.is_empty() {
                let timeout = match shutdown_deadline.flatten() {
                    Some(deadline) => self
                        .poll_timeout
                        .min(deadline.saturating_duration_since(Instant::now())),
                    None => self.poll_timeout,
                };
                if let Err(e) = self.engine.poll(timeout) {
                    tracing::warn!(error = %e, "Transfer engine poll failed");
                }
            }
        }

        tracing::debug!("Dispatcher loop exited");
    }

    /// Swaps out the pending queue. Blocks while there is nothing to do.
    fn take_pending(&self) -> (Vec<RequestState>, bool) {
        let mut shared = self.shared.lock();
        while shared.pending.is_empty() && !shared.shutdown && self.active.states.is_empty() {
            shared = self
                .shared
                .work_ready
                .wait(shared)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let pending = std::mem::take(&mut shared.pending);
        shared.active += pending.len();
        (pending, shared.shutdown)
    }

    fn admit(&mut self, mut state: RequestState) {
        if !state.result_needed() {
            // Abandoned before it started; dropping releases the handle.
            return;
        }

        let token = Token(self.next_token);
        self.next_token += 1;

        let admitted = match state.handle_mut() {
            Some(handle) => self.engine.add(token, handle),
            None => Err(EngineError::new(
                EngineCode::Internal,
                "request has no transfer handle",
            )),
        };
        match admitted {
            Ok(()) => {
                tracing::trace!(%token, "Transfer admitted");
                self.active.states.insert(token, state);
            }
            Err(e) => {
                tracing::warn!(
                    %token,
                    code = ?e.code,
                    detail = %e.detail,
                    "Transfer engine rejected handle"
                );
                state.fail(e.code.to_error(&e.detail));
            }
        }
    }

    fn reject_at_shutdown(mut state: RequestState) {
        state.fail(TransportError::unavailable("transport is shutting down"));
    }

    fn finish(&mut self, completion: Completion) {
        let Some(mut state) = self.active.states.remove(&completion.token) else {
            tracing::error!(token = %completion.token, "Completion for unknown transfer");
            return;
        };

        if completion.code == EngineCode::Framing {
            // Never hand a connection with corrupted framing to another request.
            state.forbid_reuse();
        }
        if let Some(handle) = state.handle_mut() {
            self.engine.remove(completion.token, handle);
        }

        if completion.code.is_ok() {
            state.succeed();
        } else {
            tracing::warn!(
                token = %completion.token,
                code = ?completion.code,
                detail = %completion.detail,
                "Error in transfer: {}",
                completion.code
            );
            state.fail(completion.code.to_error(&completion.detail));
        }
    }

    fn abort_all(&mut self) {
        let tokens: Vec<Token> = self.active.states.keys().copied().collect();
        tracing::warn!(
            count = tokens.len(),
            "Shutdown grace elapsed; aborting active transfers"
        );
        for token in tokens {
            self.finish(Completion {
                token,
                code: EngineCode::Aborted,
                detail: "aborted at shutdown".to_string(),
            });
        }
        self.shared.set_active(0);
    }
}
