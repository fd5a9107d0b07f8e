//! Helpers shared by unit tests.

use crate::capture::session::SealKind;
use crate::capture::{CaptureLimits, CaptureSession, RequestDescriptor, ResponseDescriptor};
use crate::record::Record;

pub(crate) fn descriptor(path: &str) -> RequestDescriptor {
    RequestDescriptor {
        secure: false,
        method: http::Method::GET,
        host: "localhost".into(),
        path: path.into(),
        query: None,
        remote_addr: Some("127.0.0.1".parse().expect("valid ip")),
        headers: http::HeaderMap::new(),
    }
}

pub(crate) fn sample_record(path: &str) -> Record {
    sample_record_with_body(path, b"")
}

pub(crate) fn sample_record_with_body(path: &str, body: &[u8]) -> Record {
    let session = CaptureSession::open(&descriptor(path), CaptureLimits::default());
    session.start_processing();
    session.capture_request_body(body);
    session.complete_processing(&ResponseDescriptor::new(http::StatusCode::OK));
    session
        .seal(SealKind::Transferred)
        .expect("fresh session seals")
}
