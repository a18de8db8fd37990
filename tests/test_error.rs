use courier::transport::EngineCode;
use courier::{ErrorCode, TransportError};

#[test]
fn test_engine_codes_map_to_error_codes() {
    assert_eq!(EngineCode::Ok.status(), None);
    for code in [EngineCode::UrlMalformed, EngineCode::UnsupportedProtocol, EngineCode::BadOption] {
        assert_eq!(code.status(), Some(ErrorCode::InvalidArgument));
    }
    for code in [
        EngineCode::CouldNotResolveHost,
        EngineCode::CouldNotConnect,
        EngineCode::TimedOut,
        EngineCode::RecvError,
        EngineCode::Framing,
        EngineCode::Aborted,
    ] {
        assert_eq!(code.status(), Some(ErrorCode::Unavailable));
    }
    for code in [EngineCode::WriteAborted, EngineCode::ReadAborted, EngineCode::Internal] {
        assert_eq!(code.status(), Some(ErrorCode::Internal));
    }
}

#[test]
fn test_engine_error_message_carries_detail() {
    let err = EngineCode::TimedOut.to_error("request exceeded 100 ms");
    assert_eq!(err.code, ErrorCode::Unavailable);
    assert_eq!(err.message, "operation timed out: request exceeded 100 ms");

    let bare = EngineCode::CouldNotConnect.to_error("");
    assert_eq!(bare.message, "could not connect to server");
}

#[test]
fn test_transport_error_display() {
    let err = TransportError::unavailable("transport is shutting down");
    assert_eq!(err.to_string(), "unavailable: transport is shutting down");
    assert!(err.is_retryable());
    assert!(!TransportError::invalid_argument("x").is_retryable());
}
