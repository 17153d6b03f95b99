use std::{io::Cursor, sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use handwriting_analyzer::{
    ocr::{OcrEngine, OcrError, OcrWord},
    server::{router, ServerState},
    HandwritingAnalyzerBuilder,
};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "handwriting-test-boundary";

fn app() -> Router {
    let analyzer = HandwritingAnalyzerBuilder::new().build();
    router(Arc::new(ServerState { analyzer }), 1024 * 1024)
}

struct CrashingOcr;

impl OcrEngine for CrashingOcr {
    fn name(&self) -> &'static str {
        "crashing"
    }

    fn probe(&self) -> Result<String, OcrError> {
        Ok("crashing 0.1".to_string())
    }

    fn recognize(&self, _image: &GrayImage, _timeout: Duration) -> Result<Vec<OcrWord>, OcrError> {
        panic!("recognizer crashed")
    }
}

fn blank_png() -> Vec<u8> {
    let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 48, Luma([255])));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("png encodes");
    bytes.into_inner()
}

fn multipart_request(field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/analyze_handwriting")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request builds")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_reports_version_and_ocr_state() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/health_handwriting")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["tesseract_status"], "unavailable");
    assert_eq!(json["analyzer_version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn gif_upload_is_rejected() {
    let response = app()
        .oneshot(multipart_request("image", "anim.gif", b"GIF89a"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["detail"], "Only PNG, JPG, and JPEG files are accepted");
}

#[tokio::test]
async fn undecodable_upload_is_a_bad_request() {
    let response = app()
        .oneshot(multipart_request("image", "page.png", b"not an image"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert!(json["detail"].as_str().is_some());
}

#[tokio::test]
async fn blank_png_yields_warning_report() {
    let response = app()
        .oneshot(multipart_request("image", "blank.PNG", &blank_png()))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "warning");
    assert_eq!(json["total_lines_detected"], 0);
    assert_eq!(json["line_analysis_results"], serde_json::json!([]));
    assert_eq!(json["debug_info"]["image_shape"], serde_json::json!([48, 64, 1]));
}

#[tokio::test]
async fn missing_image_field_is_unprocessable() {
    let response = app()
        .oneshot(multipart_request("file", "page.png", &blank_png()))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn responses_carry_cors_headers() {
    let response = app()
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/analyze_handwriting")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );

    let response = app()
        .oneshot(multipart_request("image", "anim.gif", b"GIF89a"))
        .await
        .expect("response");
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn analysis_crash_is_a_server_error() {
    let analyzer = HandwritingAnalyzerBuilder::new()
        .ocr_engine(Arc::new(CrashingOcr))
        .build();
    let app = router(Arc::new(ServerState { analyzer }), 1024 * 1024);
    let response = app
        .oneshot(multipart_request("image", "blank.png", &blank_png()))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    let detail = json["detail"].as_str().expect("detail");
    assert!(detail.starts_with("Server error: "));
    assert!(detail.contains("recognizer crashed"));
}
