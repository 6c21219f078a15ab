pub mod http;
pub mod stub;

use std::sync::Arc;

use anyhow::Result;

use crate::detect::backend::FaceDetector;

pub use http::HttpDetector;
pub use stub::StubDetector;

/// Pick a detector backend by URL.
///
/// `stub://` runs the local stub; `stub://<name>` labels its faces `<name>`.
/// Anything else is treated as an HTTP detector endpoint.
pub fn detector_from_url(url: &str, bearer_token: Option<&str>) -> Result<Arc<dyn FaceDetector>> {
    if let Some(identity) = url.strip_prefix("stub://") {
        let detector = if identity.trim().is_empty() {
            StubDetector::new()
        } else {
            StubDetector::with_identity(identity.trim())
        };
        return Ok(Arc::new(detector));
    }
    let mut detector = HttpDetector::new(url)?;
    if let Some(token) = bearer_token {
        detector = detector.with_bearer_token(token);
    }
    Ok(Arc::new(detector))
}
