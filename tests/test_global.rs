//! Tests for the process-wide default transport

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use common::{wait_for, Script, ScriptedEngine, Tracker};
use courier::mock::MockHttpTransport;
use courier::transport::{Dispatcher, DispatcherConfig, PooledHandleFactory};
use courier::{default_transport, set_default_transport, HttpRequest, HttpResponse, HttpTransport};

// Everything lives in one test: the default is process-wide state.
#[test]
fn test_default_transport_can_be_replaced() {
    let first = default_transport().unwrap();
    let again = default_transport().unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    let mock = Arc::new(MockHttpTransport::new());
    let mut responses = HashMap::new();
    responses.insert("GET http://svc/".to_string(), HttpResponse::new(200, "mocked"));
    mock.reset(responses, false);
    set_default_transport(Some(mock.clone() as Arc<dyn HttpTransport>)).unwrap();

    let current = default_transport().unwrap();
    let response = current
        .issue_request(&HttpRequest::get("http://svc/"), Bytes::new(), None, None)
        .wait()
        .unwrap();
    assert_eq!(&response.payload[..], b"mocked");
    assert_eq!(mock.requests().len(), 1);

    // The replaced instance stays usable by whoever still holds it.
    let err = first
        .issue_request(&HttpRequest::get("https://svc/"), Bytes::new(), None, None)
        .wait()
        .unwrap_err();
    assert_eq!(err.code, courier::ErrorCode::InvalidArgument);
    drop(first);
    drop(again);

    set_default_transport(None).unwrap();
    let rebuilt = default_transport().unwrap();
    let mock_dyn: Arc<dyn HttpTransport> = mock;
    assert!(!Arc::ptr_eq(&rebuilt, &mock_dyn));
    drop(rebuilt);

    // A swap while a request is in flight leaves that request untouched,
    // even when the swapped-out instance has a short shutdown grace.
    let tracker = Tracker::new();
    let engine = ScriptedEngine::new(tracker.clone()).script(
        "http://svc/slow",
        Script::ok(b"finished").delayed(Duration::from_millis(500)),
    );
    let factory = Arc::new(PooledHandleFactory::new(4, 0));
    let config = DispatcherConfig {
        shutdown_grace: Duration::from_millis(50),
        ..DispatcherConfig::default()
    };
    let scripted = Dispatcher::new(engine, factory.clone(), config).unwrap();
    set_default_transport(Some(Arc::new(scripted) as Arc<dyn HttpTransport>)).unwrap();

    let in_flight = default_transport()
        .unwrap()
        .issue_request(&HttpRequest::get("http://svc/slow"), Bytes::new(), None, None);
    assert!(wait_for(Duration::from_secs(5), || tracker.adds.load(Ordering::SeqCst) == 1));

    let started = Instant::now();
    set_default_transport(Some(Arc::new(MockHttpTransport::new()) as Arc<dyn HttpTransport>))
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));

    let response = in_flight.wait().unwrap();
    assert_eq!(&response.payload[..], b"finished");
    assert!(wait_for(Duration::from_secs(5), || factory.live() == 0));
}
