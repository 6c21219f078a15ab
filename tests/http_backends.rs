use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use facecam_overlay::capture::HttpCamera;
use facecam_overlay::{
    CaptureError, CaptureRequest, DetectionSample, FaceDetector, HttpDetector, VideoDevice,
};

struct Reply {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Reply {
    fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }
}

/// Serves one reply per connection, in order, and returns the raw requests.
fn serve(replies: Vec<Reply>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = std::thread::spawn(move || {
        let mut requests = Vec::new();
        for reply in replies {
            let (mut stream, _) = listener.accept().expect("accept");
            requests.push(read_request(&mut stream));
            let head = format!(
                "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                reply.status,
                reply.content_type,
                reply.body.len()
            );
            stream.write_all(head.as_bytes()).expect("write head");
            stream.write_all(&reply.body).expect("write body");
        }
        requests
    });
    (format!("http://{}", addr), handle)
}

fn read_request(stream: &mut impl Read) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).expect("read");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + length {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([40, 90, 200]));
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&image)
        .expect("encode");
    out
}

fn sample() -> DetectionSample {
    DetectionSample {
        jpeg: jpeg(120, 90),
        width: 120,
        height: 90,
        source_width: 640,
        source_height: 480,
        taken_at: Instant::now(),
    }
}

#[test]
fn detector_uploads_multipart_and_parses_faces() -> Result<()> {
    let body = r#"{"status":"success","faces":[{"bbox":{"x":30,"y":20,"w":40,"h":30},"name":"Abebe","confidence":0.91}]}"#;
    let (base, server) = serve(vec![Reply::new(200, "application/json", body)]);
    let detector = HttpDetector::new(&format!("{}/api/detect", base))?.with_bearer_token("s3cret");

    let response = detector.detect(&sample())?;
    let face = response.primary_face().expect("face");
    assert_eq!(face.name.as_deref(), Some("Abebe"));
    assert_eq!(face.bbox.w, 40.0);

    let requests = server.join().expect("server");
    let request = &requests[0];
    assert!(request.starts_with("POST /api/detect"));
    assert!(request.to_lowercase().contains("authorization: bearer s3cret"));
    assert!(request.contains("multipart/form-data; boundary="));
    assert!(request.contains("name=\"image\"; filename=\"sample.jpg\""));
    Ok(())
}

#[test]
fn detector_server_error_is_a_failure() -> Result<()> {
    let (base, server) = serve(vec![Reply::new(500, "text/plain", "boom")]);
    let detector = HttpDetector::new(&base)?;

    assert!(detector.detect(&sample()).is_err());
    server.join().expect("server");
    Ok(())
}

#[test]
fn detector_non_success_status_means_no_face() -> Result<()> {
    let (base, server) = serve(vec![Reply::new(
        200,
        "application/json",
        r#"{"status":"error","message":"no model"}"#,
    )]);
    let detector = HttpDetector::new(&base)?;

    let response = detector.detect(&sample())?;
    assert!(response.primary_face().is_none());
    server.join().expect("server");
    Ok(())
}

#[test]
fn snapshot_camera_reads_native_frames() -> Result<()> {
    let (base, server) = serve(vec![
        Reply::new(200, "image/jpeg", jpeg(320, 240)),
        Reply::new(200, "image/jpeg", jpeg(320, 240)),
    ]);
    let request = CaptureRequest {
        url: format!("{}/snapshot.jpg", base),
        ..CaptureRequest::default()
    };

    let mut camera = HttpCamera::open(&request)?;
    assert_eq!(camera.native_size(), (320, 240));
    assert!(camera.is_ready());
    assert_eq!(camera.read_frame()?.expect("first").size(), (320, 240));
    assert_eq!(camera.read_frame()?.expect("second").size(), (320, 240));

    camera.stop();
    assert!(!camera.is_ready());
    assert!(camera.read_frame()?.is_none());

    let requests = server.join().expect("server");
    assert!(requests[0].contains("width=640"));
    assert!(requests[0].contains("height=480"));
    Ok(())
}

#[test]
fn unauthorized_camera_is_permission_denied() {
    let (base, server) = serve(vec![Reply::new(401, "text/plain", "login required")]);
    let request = CaptureRequest {
        url: base,
        ..CaptureRequest::default()
    };

    let err = HttpCamera::open(&request).err();
    assert!(matches!(err, Some(CaptureError::PermissionDenied(_))));
    server.join().expect("server");
}
