//! Scripted transfer engine for dispatcher tests.
//!
//! Each URL maps to a [`Script`] describing the simulated response, its
//! delay and its final engine code. A shared [`Tracker`] counts every engine
//! call and exposes a gate that can hold the dispatcher inside `perform`.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use courier::transport::{
    Completion, Dispatcher, DispatcherConfig, EngineCode, EngineError, PooledHandleFactory,
    Progress, Token, TransferCallbacks, TransferEngine, TransferHandle, TransferOptions, Wakeup,
};

/// Body bytes moved per callback invocation.
pub const FAKE_BUFFER_SIZE: usize = 16;

#[derive(Debug, Clone)]
pub struct Script {
    pub status: u16,
    pub headers: Vec<String>,
    pub body: Vec<u8>,
    pub delay: Duration,
    pub code: EngineCode,
    pub echo_upload: bool,
    pub reject: Option<EngineCode>,
}

impl Script {
    pub fn ok(body: &[u8]) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.to_vec(),
            delay: Duration::ZERO,
            code: EngineCode::Ok,
            echo_upload: false,
            reject: None,
        }
    }

    pub fn echo() -> Self {
        Self {
            echo_upload: true,
            ..Self::ok(b"")
        }
    }

    pub fn failing(code: EngineCode) -> Self {
        Self {
            code,
            ..Self::ok(b"")
        }
    }

    pub fn rejected(code: EngineCode) -> Self {
        Self {
            reject: Some(code),
            ..Self::ok(b"")
        }
    }

    pub fn header(mut self, line: &str) -> Self {
        self.headers.push(line.to_string());
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Counters and controls shared between a test and its engine.
#[derive(Default)]
pub struct Tracker {
    pub adds: AtomicUsize,
    pub removes: AtomicUsize,
    pub performs: AtomicUsize,
    pub forbid_reuse_removes: AtomicUsize,
    pub connections_opened: AtomicUsize,
    pub connections_discarded: AtomicUsize,
    pub blocked_in_perform: AtomicBool,
    pub added: Mutex<Vec<TransferOptions>>,
    gate_closed: Mutex<bool>,
    gate: Condvar,
}

impl Tracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn close_gate(&self) {
        *self.gate_closed.lock().unwrap() = true;
    }

    pub fn open_gate(&self) {
        *self.gate_closed.lock().unwrap() = false;
        self.gate.notify_all();
    }

    pub fn added_urls(&self) -> Vec<String> {
        self.added
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.url.clone())
            .collect()
    }

    pub fn options_for(&self, url: &str) -> Option<TransferOptions> {
        self.added
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.url == url)
            .cloned()
    }

    fn pass_gate(&self) {
        let mut closed = self.gate_closed.lock().unwrap();
        while *closed {
            self.blocked_in_perform.store(true, Ordering::SeqCst);
            closed = self.gate.wait(closed).unwrap();
        }
        self.blocked_in_perform.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeWakeup {
    woken: Mutex<bool>,
    cv: Condvar,
}

impl Wakeup for FakeWakeup {
    fn wake(&self) {
        *self.woken.lock().unwrap() = true;
        self.cv.notify_all();
    }
}

struct FakeTransfer {
    script: Script,
    started: Instant,
    timeout: Option<Duration>,
    upload_size: Option<u64>,
    upload: Vec<u8>,
    connection: u64,
    finished: bool,
}

impl FakeTransfer {
    fn upload_done(&self) -> bool {
        self.upload_size
            .is_none_or(|size| self.upload.len() as u64 >= size)
    }

    /// When this transfer will next want attention.
    fn due(&self) -> Instant {
        match self.timeout {
            Some(t) if t < self.script.delay => self.started + t,
            _ => self.started + self.script.delay,
        }
    }
}

pub struct ScriptedEngine {
    scripts: HashMap<String, Script>,
    tracker: Arc<Tracker>,
    wakeup: Arc<FakeWakeup>,
    transfers: BTreeMap<Token, FakeTransfer>,
    completions: VecDeque<Completion>,
    idle_connections: Vec<u64>,
    next_connection: u64,
}

impl ScriptedEngine {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self {
            scripts: HashMap::new(),
            tracker,
            wakeup: Arc::new(FakeWakeup::default()),
            transfers: BTreeMap::new(),
            completions: VecDeque::new(),
            idle_connections: Vec::new(),
            next_connection: 1,
        }
    }

    pub fn script(mut self, url: &str, script: Script) -> Self {
        self.scripts.insert(url.to_string(), script);
        self
    }

    fn finish(&mut self, token: Token, code: EngineCode, detail: &str) {
        if let Some(t) = self.transfers.get_mut(&token) {
            t.finished = true;
        }
        self.completions.push_back(Completion {
            token,
            code,
            detail: detail.to_string(),
        });
    }

    fn deliver(&mut self, token: Token, callbacks: &mut dyn TransferCallbacks) {
        let Some(transfer) = self.transfers.get(&token) else {
            return;
        };
        let script = transfer.script.clone();
        let body = if script.echo_upload {
            transfer.upload.clone()
        } else {
            script.body.clone()
        };

        let status_line = format!("HTTP/1.1 {} OK\r\n", script.status);
        callbacks.on_header(token, status_line.as_bytes());
        for line in &script.headers {
            callbacks.on_header(token, format!("{}\r\n", line).as_bytes());
        }
        callbacks.on_header(token, b"\r\n");

        for chunk in body.chunks(FAKE_BUFFER_SIZE) {
            if callbacks.on_write(token, chunk) != chunk.len() {
                self.finish(token, EngineCode::WriteAborted, "write callback refused data");
                return;
            }
        }
        self.finish(token, script.code, "simulated");
    }
}

impl TransferEngine for ScriptedEngine {
    fn add(&mut self, token: Token, handle: &mut TransferHandle) -> Result<(), EngineError> {
        self.tracker.adds.fetch_add(1, Ordering::SeqCst);
        self.tracker.added.lock().unwrap().push(handle.options.clone());

        let script = self
            .scripts
            .get(&handle.options.url)
            .cloned()
            .unwrap_or_else(|| Script {
                status: 404,
                ..Script::ok(b"")
            });
        if let Some(code) = script.reject {
            return Err(EngineError::new(code, "simulated rejection"));
        }

        let connection = match self.idle_connections.pop() {
            Some(c) => c,
            None => {
                self.tracker.connections_opened.fetch_add(1, Ordering::SeqCst);
                self.next_connection += 1;
                self.next_connection - 1
            }
        };
        self.transfers.insert(
            token,
            FakeTransfer {
                script,
                started: Instant::now(),
                timeout: handle.options.request_timeout,
                upload_size: handle.options.upload_size,
                upload: Vec::new(),
                connection,
                finished: false,
            },
        );
        Ok(())
    }

    fn remove(&mut self, token: Token, handle: &mut TransferHandle) {
        self.tracker.removes.fetch_add(1, Ordering::SeqCst);
        let Some(transfer) = self.transfers.remove(&token) else {
            return;
        };
        if handle.options.forbid_reuse {
            self.tracker.forbid_reuse_removes.fetch_add(1, Ordering::SeqCst);
            self.tracker.connections_discarded.fetch_add(1, Ordering::SeqCst);
        } else if transfer.finished {
            self.idle_connections.push(transfer.connection);
        } else {
            self.tracker.connections_discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn perform(&mut self, callbacks: &mut dyn TransferCallbacks) -> Progress {
        self.tracker.pass_gate();
        self.tracker.performs.fetch_add(1, Ordering::SeqCst);

        let mut progress = Progress::Idle;
        let now = Instant::now();
        let tokens: Vec<Token> = self
            .transfers
            .iter()
            .filter(|(_, t)| !t.finished)
            .map(|(k, _)| *k)
            .collect();

        for token in tokens {
            let Some(transfer) = self.transfers.get_mut(&token) else {
                continue;
            };

            if !transfer.upload_done() {
                let size = transfer.upload_size.unwrap_or(0);
                let remaining = (size - transfer.upload.len() as u64) as usize;
                let mut buf = vec![0u8; remaining.min(FAKE_BUFFER_SIZE)];
                let n = callbacks.on_read(token, &mut buf);
                if n == 0 {
                    self.finish(token, EngineCode::ReadAborted, "payload ended early");
                    continue;
                }
                transfer.upload.extend_from_slice(&buf[..n]);
                progress = Progress::Again;
                continue;
            }

            let elapsed = now.duration_since(transfer.started);
            let delay = transfer.script.delay;
            match transfer.timeout {
                Some(limit) if limit < delay => {
                    if elapsed >= limit {
                        self.finish(token, EngineCode::TimedOut, "operation timed out");
                    }
                }
                _ if elapsed >= delay => self.deliver(token, callbacks),
                _ => {}
            }
        }
        progress
    }

    fn next_completion(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }

    fn poll(&mut self, timeout: Duration) -> Result<(), EngineError> {
        let now = Instant::now();
        let next_due = self
            .transfers
            .values()
            .filter(|t| !t.finished)
            .map(FakeTransfer::due)
            .min();
        let wait = match next_due {
            Some(due) => timeout.min(due.saturating_duration_since(now)),
            None => timeout,
        };

        let mut woken = self.wakeup.woken.lock().unwrap();
        if !*woken {
            woken = self.wakeup.cv.wait_timeout(woken, wait).unwrap().0;
        }
        *woken = false;
        Ok(())
    }

    fn waker(&self) -> Arc<dyn Wakeup> {
        self.wakeup.clone()
    }
}

pub fn dispatcher_with(
    engine: ScriptedEngine,
    config: DispatcherConfig,
) -> (Dispatcher, Arc<PooledHandleFactory>) {
    let factory = Arc::new(PooledHandleFactory::new(8, 0));
    let dispatcher = Dispatcher::new(engine, factory.clone(), config).unwrap();
    (dispatcher, factory)
}

pub fn dispatcher(engine: ScriptedEngine) -> (Dispatcher, Arc<PooledHandleFactory>) {
    dispatcher_with(engine, DispatcherConfig::default())
}

/// Polls `condition` until it holds or `limit` elapses.
pub fn wait_for(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
