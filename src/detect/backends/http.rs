use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::detect::backend::FaceDetector;
use crate::detect::result::DetectorResponse;
use crate::frame::DetectionSample;

const IMAGE_FIELD: &str = "image";
const IMAGE_FILENAME: &str = "sample.jpg";

/// Detector service reached over HTTP.
///
/// Each call uploads one JPEG as `multipart/form-data` (field `image`) and
/// expects a JSON `DetectorResponse`. No request timeout is applied: a hung
/// call only holds the in-flight flag and blocks new detection ticks.
pub struct HttpDetector {
    agent: ureq::Agent,
    url: String,
    bearer: Option<String>,
}

impl HttpDetector {
    pub fn new(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("parse detector url {}", url))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported detector scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        Ok(Self {
            agent: ureq::AgentBuilder::new().build(),
            url: parsed.to_string(),
            bearer: None,
        })
    }

    /// Attach an opaque bearer credential to every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.bearer = (!token.trim().is_empty()).then_some(token);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FaceDetector for HttpDetector {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&self, sample: &DetectionSample) -> Result<DetectorResponse> {
        let boundary = format!("----facecam{:016x}", rand::random::<u64>());
        let body = multipart_body(&boundary, &sample.jpeg);

        let mut request = self.agent.post(&self.url).set(
            "Content-Type",
            &format!("multipart/form-data; boundary={}", boundary),
        );
        if let Some(token) = &self.bearer {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }

        let response = request
            .send_bytes(&body)
            .with_context(|| format!("post sample to {}", self.url))?;
        let text = response
            .into_string()
            .context("read detector response body")?;
        serde_json::from_str(&text).context("decode detector response")
    }
}

fn multipart_body(boundary: &str, jpeg: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(jpeg.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            IMAGE_FIELD, IMAGE_FILENAME
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    body.extend_from_slice(jpeg);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
