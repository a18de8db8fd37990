//! Default transfer engine: HTTP/1.1 over TCP.
//!
//! `TcpEngine` owns a single-threaded tokio runtime that is only ever
//! driven from the dispatcher thread, inside `perform` and `poll`. Each
//! admitted handle becomes one task on that runtime; tasks report back
//! through an event channel that `perform` drains, invoking the request
//! callbacks as it goes.
//!
//! Only plain `http://` URLs are supported. Idle keep-alive connections are
//! pooled per origin and handed to later transfers unless the handle was
//! marked `forbid_reuse`.

mod exchange;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::transport::engine::{
    Completion, EngineCode, EngineError, Progress, Token, TransferCallbacks, TransferEngine, Wakeup,
};
use crate::transport::handle::TransferHandle;

use exchange::{Channel, Connection, Event, Plan};

pub use exchange::UPLOAD_CHUNK_SIZE;

/// Idle connections kept per origin.
const MAX_IDLE_PER_ORIGIN: usize = 8;

struct Transfer {
    task: JoinHandle<()>,
    verbose: bool,
    finished: bool,
    connection: Option<Connection>,
}

#[derive(Default)]
struct ConnectionPool {
    idle: HashMap<String, Vec<Connection>>,
}

impl ConnectionPool {
    fn take(&mut self, origin: &str) -> Option<Connection> {
        self.idle.get_mut(origin).and_then(Vec::pop)
    }

    fn put(&mut self, connection: Connection) {
        let idle = self.idle.entry(connection.origin.clone()).or_default();
        if idle.len() < MAX_IDLE_PER_ORIGIN {
            idle.push(connection);
        }
    }

    fn len(&self) -> usize {
        self.idle.values().map(Vec::len).sum()
    }
}

struct NotifyWakeup(Arc<Notify>);

impl Wakeup for NotifyWakeup {
    fn wake(&self) {
        self.0.notify_one();
    }
}

pub struct TcpEngine {
    runtime: Runtime,
    signal: Arc<Notify>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    transfers: HashMap<Token, Transfer>,
    completions: VecDeque<Completion>,
    pool: ConnectionPool,
}

impl TcpEngine {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            runtime,
            signal: Arc::new(Notify::new()),
            events_tx,
            events_rx,
            transfers: HashMap::new(),
            completions: VecDeque::new(),
            pool: ConnectionPool::default(),
        })
    }

    /// Idle pooled connections across all origins.
    pub fn idle_connections(&self) -> usize {
        self.pool.len()
    }

    fn dispatch(&mut self, event: Event, callbacks: &mut dyn TransferCallbacks) {
        match event {
            Event::Header { token, line } => {
                let Some(verbose) = self.live(token).map(|t| t.verbose) else {
                    return;
                };
                if verbose {
                    tracing::debug!(
                        %token,
                        line = %String::from_utf8_lossy(&line).trim_end(),
                        "< header"
                    );
                }
                if callbacks.on_header(token, &line) != line.len() {
                    self.abort(token, EngineCode::WriteAborted, "header callback refused data");
                }
            }
            Event::Body { token, data } => {
                let Some(verbose) = self.live(token).map(|t| t.verbose) else {
                    return;
                };
                if verbose {
                    tracing::debug!(%token, bytes = data.len(), "< body");
                }
                if callbacks.on_write(token, &data) != data.len() {
                    self.abort(token, EngineCode::WriteAborted, "write callback refused data");
                }
            }
            Event::Read { token, max, reply } => {
                if self.live(token).is_none() {
                    return;
                }
                let mut buf = vec![0u8; max];
                let n = callbacks.on_read(token, &mut buf);
                buf.truncate(n);
                let _ = reply.send(Bytes::from(buf));
            }
            Event::Done {
                token,
                code,
                detail,
                connection,
            } => {
                let Some(transfer) = self.transfers.get_mut(&token) else {
                    return;
                };
                if transfer.finished {
                    return;
                }
                transfer.finished = true;
                transfer.connection = connection;
                self.completions.push_back(Completion {
                    token,
                    code,
                    detail,
                });
            }
        }
    }

    /// A transfer that is admitted and still running.
    fn live(&self, token: Token) -> Option<&Transfer> {
        self.transfers.get(&token).filter(|t| !t.finished)
    }

    fn abort(&mut self, token: Token, code: EngineCode, detail: &str) {
        if let Some(transfer) = self.transfers.get_mut(&token) {
            if !transfer.finished {
                transfer.task.abort();
                transfer.finished = true;
                self.completions.push_back(Completion {
                    token,
                    code,
                    detail: detail.to_string(),
                });
            }
        }
    }
}

impl TransferEngine for TcpEngine {
    fn add(&mut self, token: Token, handle: &mut TransferHandle) -> Result<(), EngineError> {
        let plan = Plan::from_options(&handle.options)?;
        // Uploads cannot be replayed from the read callback, so they always
        // start on a fresh connection.
        let pooled = if handle.options.forbid_reuse || plan.upload_size.is_some() {
            None
        } else {
            self.pool.take(&plan.origin)
        };
        if handle.options.verbose {
            tracing::debug!(
                %token,
                url = %handle.options.url,
                method = %handle.options.method,
                reused = pooled.is_some(),
                "Starting transfer"
            );
        }

        let channel = Channel {
            token,
            events: self.events_tx.clone(),
            signal: Arc::clone(&self.signal),
        };
        let task = self.runtime.spawn(exchange::run(plan, pooled, channel));
        self.transfers.insert(
            token,
            Transfer {
                task,
                verbose: handle.options.verbose,
                finished: false,
                connection: None,
            },
        );
        Ok(())
    }

    fn remove(&mut self, token: Token, handle: &mut TransferHandle) {
        let Some(transfer) = self.transfers.remove(&token) else {
            return;
        };
        if !transfer.finished {
            transfer.task.abort();
        }
        if let Some(connection) = transfer.connection {
            if handle.options.forbid_reuse {
                tracing::debug!(
                    %token,
                    origin = %connection.origin,
                    "Closing connection marked non-reusable"
                );
            } else {
                self.pool.put(connection);
            }
        }
    }

    fn perform(&mut self, callbacks: &mut dyn TransferCallbacks) -> Progress {
        // Runs every task that is ready and polls the reactor once.
        self.runtime.block_on(tokio::task::yield_now());

        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event, callbacks);
            handled += 1;
        }
        if handled > 0 {
            Progress::Again
        } else {
            Progress::Idle
        }
    }

    fn next_completion(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }

    fn poll(&mut self, timeout: Duration) -> Result<(), EngineError> {
        let signal = Arc::clone(&self.signal);
        self.runtime.block_on(async move {
            let _ = tokio::time::timeout(timeout, signal.notified()).await;
        });
        Ok(())
    }

    fn waker(&self) -> Arc<dyn Wakeup> {
        Arc::new(NotifyWakeup(Arc::clone(&self.signal)))
    }
}
