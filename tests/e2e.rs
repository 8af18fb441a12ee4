//! End-to-end integration tests for edgequake-pdfocr.
//!
//! Most tests drive the public API and the HTTP router with in-process fake
//! rasterizer / OCR backends and run everywhere. Tests that need a real
//! pdfium library or a live OCR resource are gated behind `E2E_ENABLED`.
//!
//! Run everything with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use edgequake_pdfocr::pipeline::render::validate_pdf_header;
use edgequake_pdfocr::server::{create_router, AppState, DEFAULT_MAX_UPLOAD_BYTES};
use edgequake_pdfocr::{
    BoundingBox, Coordinator, Document, FsResultStore, IngestConfig, IngestError, OcrClient,
    OcrError, OcrRegion, OcrResult, OperationHandle, PageError, PageImage, PageState,
    PdfiumRasterizer, PipelineRun, PollStatus, RasterizedPages, Rasterizer, ResultStore,
    TempBlobStore,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_enabled {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
}

/// A tiny but valid PDF with `pages` pages of Helvetica text.
fn minimal_pdf(pages: usize) -> Vec<u8> {
    let font_id = 3 + 2 * pages;
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();

    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages
        ),
    ];
    for i in 0..pages {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 100] /Contents {} 0 R \
             /Resources << /Font << /F1 {} 0 R >> >> >>",
            4 + 2 * i,
            font_id
        ));
        let content = format!("BT /F1 18 Tf 20 40 Td (Page {}) Tj ET", i + 1);
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ));
    }
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, obj) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, obj).as_bytes());
    }
    let xref = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for off in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    out
}

fn pdfium_dir() -> Option<PathBuf> {
    std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from)
}

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Produces `pages` synthetic page images for anything with a `%PDF` header.
struct FakeRasterizer {
    pages: usize,
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(&self, pdf: &[u8], scale: f32) -> Result<RasterizedPages, IngestError> {
        validate_pdf_header(pdf)?;
        let items: Vec<Result<PageImage, PageError>> = (0..self.pages)
            .map(|index| {
                Ok(PageImage {
                    index,
                    png: format!("png-{}", index).into_bytes(),
                    width: 100,
                    height: 50,
                    scale,
                })
            })
            .collect();
        Ok(RasterizedPages::new(
            self.pages,
            Box::pin(futures::stream::iter(items)),
        ))
    }
}

/// Recognises every image as one line of text; images containing `fail`
/// come back with a backend failure.
#[derive(Default)]
struct FakeOcr {
    submits: AtomicUsize,
}

#[async_trait]
impl OcrClient for FakeOcr {
    async fn submit(&self, image: &[u8]) -> Result<OperationHandle, OcrError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        Ok(OperationHandle(String::from_utf8_lossy(image).into_owned()))
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<PollStatus, OcrError> {
        if handle.as_str().contains("fail") {
            return Ok(PollStatus::Done(OcrResult::failed("rejected by fake")));
        }
        Ok(PollStatus::Done(
            OcrResult::succeeded(vec![OcrRegion {
                bounding_box: BoundingBox::try_from(vec![10.0, 10.0, 90.0, 10.0, 90.0, 30.0, 10.0, 30.0])
                    .unwrap(),
                text: format!("read {}", handle.as_str()),
            }])
            .with_size(100.0, 50.0),
        ))
    }
}

fn fast_config() -> IngestConfig {
    IngestConfig::builder()
        .concurrency(2)
        .poll_interval(Duration::from_millis(1))
        .max_poll_attempts(5)
        .build()
        .unwrap()
}

fn fake_coordinator(pages: usize, results: &TempDir) -> (Coordinator, Arc<FakeOcr>) {
    let ocr = Arc::new(FakeOcr::default());
    let coordinator = Coordinator::new(
        fast_config(),
        Arc::new(FakeRasterizer { pages }),
        ocr.clone(),
    )
    .with_store(Arc::new(FsResultStore::new(results.path())));
    (coordinator, ocr)
}

fn fake_router(pages: usize, results: &TempDir) -> Router {
    let (coordinator, _) = fake_coordinator(pages, results);
    create_router(AppState::new(coordinator), DEFAULT_MAX_UPLOAD_BYTES)
}

fn multipart_body(field: &str, file_name: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let boundary = "pdfocr-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; \
             filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

fn upload(uri: &str, field: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
    let (content_type, body) = multipart_body(field, file_name, bytes);
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Pipeline through the public API ──────────────────────────────────────────

#[tokio::test]
async fn run_persists_every_page_and_reuses_them() {
    let results = TempDir::new().unwrap();
    let (coordinator, ocr) = fake_coordinator(3, &results);
    let doc = Document::named("Quarterly Report.pdf", b"%PDF-1.7".to_vec());

    let first = coordinator.run(&doc).await.unwrap();
    assert_eq!(first.page_count, 3);
    assert_eq!(first.stats.succeeded_pages, 3);
    for n in 1..=3 {
        assert!(results
            .path()
            .join(format!("Quarterly_Report_page_{n}.json"))
            .exists());
    }
    assert_eq!(ocr.submits.load(Ordering::SeqCst), 3);

    let second = coordinator.run(&doc).await.unwrap();
    assert_eq!(second.stats.cached_pages, 3);
    assert_eq!(ocr.submits.load(Ordering::SeqCst), 3);
    assert_eq!(
        second.pages[0].result,
        first.pages[0].result,
        "cached result must equal the stored one"
    );
}

#[tokio::test]
async fn same_name_with_new_content_is_recognised_again() {
    let results = TempDir::new().unwrap();
    let (coordinator, ocr) = fake_coordinator(1, &results);

    let first = Document::named("scan.pdf", b"%PDF-first-doc".to_vec());
    coordinator.run(&first).await.unwrap();
    let second = Document::named("scan.pdf", b"%PDF-second-doc".to_vec());
    let run = coordinator.run(&second).await.unwrap();

    assert!(!run.pages[0].cached);
    assert_eq!(ocr.submits.load(Ordering::SeqCst), 2);
    let stored = FsResultStore::new(results.path())
        .get("scan_page_1")
        .await
        .unwrap();
    assert_eq!(stored.source, Some(second.fingerprint(fast_config().scale)));
}

#[tokio::test]
async fn hostile_upload_names_are_still_stored() {
    let results = TempDir::new().unwrap();
    let (coordinator, _ocr) = fake_coordinator(1, &results);

    for name in ["-scan.pdf", "v1..2 report.pdf"] {
        let run = coordinator
            .run(&Document::named(name, b"%PDF-1.7".to_vec()))
            .await
            .unwrap();
        assert_eq!(run.stats.succeeded_pages, 1, "{name}");
    }
    assert!(results.path().join("scan_page_1.json").exists());
    assert!(results.path().join("v1.2_report_page_1.json").exists());
}

#[tokio::test]
async fn run_serialises_to_camel_case_json() {
    let results = TempDir::new().unwrap();
    let (coordinator, _) = fake_coordinator(1, &results);
    let run = coordinator
        .run(&Document::named("a.pdf", b"%PDF".to_vec()))
        .await
        .unwrap();

    let json = serde_json::to_value(&run).unwrap();
    assert_eq!(json["pageCount"], 1);
    assert_eq!(json["pages"][0]["state"], "succeeded");
    assert_eq!(json["pages"][0]["image"]["imageId"], "a_page_1");
    assert_eq!(
        json["pages"][0]["result"]["regions"][0]["boundingBox"]
            .as_array()
            .unwrap()
            .len(),
        8
    );

    let back: PipelineRun = serde_json::from_value(json).unwrap();
    assert_eq!(back.pages[0].state, PageState::Succeeded);
}

#[tokio::test]
async fn stored_results_support_region_queries() {
    let results = TempDir::new().unwrap();
    let (coordinator, _) = fake_coordinator(1, &results);
    coordinator
        .run(&Document::named("form.pdf", b"%PDF".to_vec()))
        .await
        .unwrap();

    let store = FsResultStore::new(results.path());
    let result = store.get("form_page_1").await.unwrap();
    assert_eq!(result.regions_near(50.0, 20.0, 5.0).len(), 1);
    assert!(result.regions_near(0.0, 0.0, 5.0).is_empty());
    assert_eq!(result.text(), "read png-0");
}

// ── HTTP router ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn convert_pdf_returns_data_uris_in_page_order() {
    let results = TempDir::new().unwrap();
    let app = fake_router(3, &results);

    let resp = app
        .oneshot(upload("/api/convert-pdf", "pdf", "doc.pdf", b"%PDF-1.4 body"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    let images = body["images"].as_array().unwrap();
    assert_eq!(images.len(), 3);
    // "png-0" base64-encoded
    assert_eq!(images[0], "data:image/png;base64,cG5nLTA=");
}

#[tokio::test]
async fn convert_pdf_accepts_file_field() {
    let results = TempDir::new().unwrap();
    let resp = fake_router(1, &results)
        .oneshot(upload("/api/convert-pdf", "file", "doc.pdf", b"%PDF-1.4"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn convert_pdf_without_upload_is_400() {
    let results = TempDir::new().unwrap();
    let resp = fake_router(1, &results)
        .oneshot(upload("/api/convert-pdf", "other", "doc.pdf", b"%PDF-1.4"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["error"], "No PDF file uploaded");
}

#[tokio::test]
async fn convert_pdf_rejects_non_pdf() {
    let results = TempDir::new().unwrap();
    let resp = fake_router(1, &results)
        .oneshot(upload("/api/convert-pdf", "pdf", "x.pdf", b"GIF89a"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let err = json_body(resp).await["error"].as_str().unwrap().to_string();
    assert!(err.contains("Malformed"), "{err}");
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let results = TempDir::new().unwrap();
    let (coordinator, _) = fake_coordinator(1, &results);
    let app = create_router(AppState::new(coordinator), 1024);

    let resp = app
        .oneshot(upload("/api/convert-pdf", "pdf", "big.pdf", &[b'%'; 4096]))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn extract_text_returns_typed_result() {
    let results = TempDir::new().unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/api/extract-text")
        .header(header::CONTENT_TYPE, "application/json")
        // base64("hello")
        .body(Body::from(r#"{"imageData":"aGVsbG8="}"#))
        .unwrap();

    let resp = fake_router(1, &results).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["regions"][0]["text"], "read hello");
}

#[tokio::test]
async fn extract_text_backend_failure_is_502() {
    let results = TempDir::new().unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/api/extract-text")
        .header(header::CONTENT_TYPE, "application/json")
        // base64("fail")
        .body(Body::from(r#"{"imageData":"ZmFpbA=="}"#))
        .unwrap();

    let resp = fake_router(1, &results).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert!(json_body(resp).await["error"]
        .as_str()
        .unwrap()
        .contains("rejected by fake"));
}

#[tokio::test]
async fn ingest_endpoint_returns_pipeline_run() {
    let results = TempDir::new().unwrap();
    let resp = fake_router(2, &results)
        .oneshot(upload("/api/ingest", "pdf", "scan.pdf", b"%PDF-1.5"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["documentName"], "scan");
    assert_eq!(body["stats"]["succeededPages"], 2);
    assert_eq!(body["pages"][1]["image"]["imageId"], "scan_page_2");
}

#[tokio::test]
async fn result_endpoints_put_get_delete() {
    let results = TempDir::new().unwrap();
    let app = fake_router(1, &results);

    let missing = app
        .clone()
        .oneshot(
            Request::get("/api/results/nothing_page_1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert!(json_body(missing).await["error"].is_string());

    let put = app
        .clone()
        .oneshot(
            Request::put("/api/results/doc_page_1")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"status":"succeeded","regions":[{"boundingBox":[1,2,3,4],"text":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::NO_CONTENT);

    let got = app
        .clone()
        .oneshot(
            Request::get("/api/results/doc_page_1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(got.status(), StatusCode::OK);
    assert_eq!(json_body(got).await["regions"][0]["text"], "hi");

    let deleted = app
        .clone()
        .oneshot(
            Request::delete("/api/results/doc_page_1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let again = app
        .oneshot(
            Request::delete("/api/results/doc_page_1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn result_put_rejects_invalid_bounding_box() {
    let results = TempDir::new().unwrap();
    let resp = fake_router(1, &results)
        .oneshot(
            Request::put("/api/results/doc_page_1")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"status":"succeeded","regions":[{"boundingBox":[1,2,3],"text":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}

// ── Real pdfium (E2E_ENABLED) ────────────────────────────────────────────────

#[tokio::test]
async fn pdfium_rasterizes_every_page_in_order() {
    e2e_skip_unless_enabled!();
    let tmp = TempDir::new().unwrap();
    let mut rasterizer = PdfiumRasterizer::new(TempBlobStore::in_dir(tmp.path()));
    if let Some(dir) = pdfium_dir() {
        rasterizer = rasterizer.with_library_path(dir);
    }

    let pages = rasterizer.rasterize(&minimal_pdf(4), 2.0).await.unwrap();
    assert_eq!(pages.page_count(), 4);

    let images: Vec<PageImage> = pages
        .into_stream()
        .map(|r| r.expect("page should render"))
        .collect()
        .await;

    assert_eq!(images.len(), 4);
    for (i, img) in images.iter().enumerate() {
        assert_eq!(img.index, i);
        assert_eq!((img.width, img.height), (400, 200));
        assert_eq!(&img.png[1..4], b"PNG");
    }
    // Render thread released the temp PDF after the last page.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn pdfium_rejects_corrupt_pdf_and_cleans_up() {
    e2e_skip_unless_enabled!();
    let tmp = TempDir::new().unwrap();
    let mut rasterizer = PdfiumRasterizer::new(TempBlobStore::in_dir(tmp.path()));
    if let Some(dir) = pdfium_dir() {
        rasterizer = rasterizer.with_library_path(dir);
    }

    let result = rasterizer
        .rasterize(b"%PDF-1.4\nthis is not really a pdf", 2.0)
        .await;

    assert!(matches!(result, Err(IngestError::MalformedInput { .. })));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn pdfium_release_when_consumer_stops_early() {
    e2e_skip_unless_enabled!();
    let tmp = TempDir::new().unwrap();
    let mut rasterizer = PdfiumRasterizer::new(TempBlobStore::in_dir(tmp.path()));
    if let Some(dir) = pdfium_dir() {
        rasterizer = rasterizer.with_library_path(dir);
    }

    let pages = rasterizer.rasterize(&minimal_pdf(10), 1.0).await.unwrap();
    let mut stream = pages.into_stream();
    assert!(stream.next().await.unwrap().is_ok());
    drop(stream);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

// ── Live OCR backend (E2E_ENABLED + credentials) ─────────────────────────────

#[tokio::test]
async fn azure_read_full_run() {
    e2e_skip_unless_enabled!();
    let (Ok(endpoint), Ok(key)) = (
        std::env::var("AZURE_COMPUTER_VISION_ENDPOINT"),
        std::env::var("AZURE_COMPUTER_VISION_SUBSCRIPTION_KEY"),
    ) else {
        println!("SKIP: Azure credentials not set");
        return;
    };

    let results = TempDir::new().unwrap();
    let mut builder = IngestConfig::builder()
        .ocr_endpoint(endpoint)
        .ocr_api_key(key)
        .results_dir(results.path())
        .concurrency(2);
    if let Some(dir) = pdfium_dir() {
        builder = builder.pdfium_library_path(dir);
    }
    let coordinator = Coordinator::from_config(builder.build().unwrap()).unwrap();

    let run = coordinator
        .run(&Document::named("live.pdf", minimal_pdf(2)))
        .await
        .unwrap();

    assert_eq!(run.page_count, 2);
    for page in run.succeeded() {
        let text = page.result.as_ref().unwrap().text();
        println!("page {}: {:?}", page.index + 1, text);
        assert!(text.contains(&format!("Page {}", page.index + 1)));
    }
}
