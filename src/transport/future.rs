//! Single-assignment result channel between a transport and its caller.
//!
//! [`promise_future_pair`] creates a linked [`Promise`] / [`ResponseFuture`].
//! The promise is consumed when fulfilled, so a result can be set at most
//! once; dropping the future tells the transport the result is no longer
//! needed.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::TransportError;
use crate::http::HttpResponse;

pub type ResponseResult = Result<HttpResponse, TransportError>;

/// Write side of a response future.
#[derive(Debug)]
pub struct Promise {
    tx: oneshot::Sender<ResponseResult>,
}

/// Read side: resolves to the response or the error that ended the request.
///
/// Usable both as a `Future` and, outside an async runtime, through
/// [`ResponseFuture::wait`].
#[derive(Debug)]
#[must_use = "dropping a ResponseFuture abandons the request"]
pub struct ResponseFuture {
    rx: oneshot::Receiver<ResponseResult>,
}

pub fn promise_future_pair() -> (Promise, ResponseFuture) {
    let (tx, rx) = oneshot::channel();
    (Promise { tx }, ResponseFuture { rx })
}

impl Promise {
    /// False once every observer of the future has gone away.
    pub fn result_needed(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn set_result(self, result: ResponseResult) {
        // A closed receiver means nobody is waiting; the result is discarded.
        let _ = self.tx.send(result);
    }
}

impl ResponseFuture {
    /// A future that is already resolved.
    pub fn ready(result: ResponseResult) -> Self {
        let (promise, future) = promise_future_pair();
        promise.set_result(result);
        future
    }

    /// Blocks the current thread until the result is available.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> ResponseResult {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(dropped()))
    }

    /// Returns the result if it is already available.
    pub fn try_result(&mut self) -> Option<ResponseResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

impl Future for ResponseFuture {
    type Output = ResponseResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(dropped())))
    }
}

fn dropped() -> TransportError {
    TransportError::internal("request was dropped before completion")
}
