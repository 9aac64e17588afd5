//! HTTP API tests against an in-process server with a deterministic model.

use anyhow::Result;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use clap::Parser;
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use matteserve::segmentation::{Matte, ModelRegistry, ModelSpec, SegmentationModel};
use matteserve::{build_router, AppState, Config};
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const MAX_FILE_SIZE: usize = 200_000;

/// Marks strongly green pixels as foreground
struct GreenScreen;

impl SegmentationModel for GreenScreen {
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte> {
        Ok(GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
            let p = frame.get_pixel(x, y);
            Luma([if p[1] > 128 && p[0] < 128 { 255 } else { 0 }])
        }))
    }

    fn input_size(&self) -> (u32, u32) {
        (320, 320)
    }

    fn name(&self) -> &str {
        "green"
    }
}

struct TestApp {
    server: TestServer,
    _dir: TempDir,
}

fn test_app() -> TestApp {
    test_app_with(|models| ModelRegistry::new(models, 1))
}

/// App whose registry comes from `registry`, with [`GreenScreen`] added as "green"
fn test_app_with(registry: impl FnOnce(&Path) -> ModelRegistry) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models");
    std::fs::create_dir_all(&models).unwrap();

    let config = Config::parse_from([
        "matteserve".to_string(),
        "--models-dir".to_string(),
        models.display().to_string(),
        "--results-dir".to_string(),
        dir.path().join("results").display().to_string(),
        "--default-model".to_string(),
        "green".to_string(),
        "--max-file-size".to_string(),
        MAX_FILE_SIZE.to_string(),
        "--max-batch-files".to_string(),
        "3".to_string(),
        "--cleanup-interval-secs".to_string(),
        "0".to_string(),
    ]);

    let registry = Arc::new(registry(&config.models_dir));
    registry.insert("green", Box::new(GreenScreen));
    let state = AppState::with_registry(config, registry).unwrap();

    TestApp {
        server: TestServer::new(build_router(Arc::new(state))).unwrap(),
        _dir: dir,
    }
}

/// Green square on a red background
fn scene_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        if x > width / 4 && x < 3 * width / 4 && y > height / 4 && y < 3 * height / 4 {
            Rgb([0, 255, 0])
        } else {
            Rgb([255, 0, 0])
        }
    });
    encode(&DynamicImage::ImageRgb8(image))
}

fn encode(image: &DynamicImage) -> Vec<u8> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

fn png_part(filename: &str, data: Vec<u8>) -> Part {
    Part::bytes(data).file_name(filename).mime_type("image/png")
}

fn image_form(filename: &str, data: Vec<u8>) -> MultipartForm {
    MultipartForm::new().add_part("image", png_part(filename, data))
}

fn decode_data_url(url: &str) -> DynamicImage {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
    image::load_from_memory(&STANDARD.decode(encoded).unwrap()).unwrap()
}

async fn upload(app: &TestApp, form: MultipartForm) -> Value {
    let response = app.server.post("/api/remove-background").multipart(form).await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    response.json()
}

#[tokio::test]
async fn health_reports_models() {
    let app = test_app();
    let response = app.server.get("/api/health").await;
    assert_eq!(response.status_code(), 200);

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["loaded_models"], json!(["green"]));
    assert_eq!(body["default_model"], "green");
    let models = body["models"].as_array().unwrap();
    assert!(models.contains(&json!("u2net")));
    assert!(models.contains(&json!("green")));
}

#[tokio::test]
async fn health_answers_while_a_model_loads() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let app = test_app_with(|models| {
        std::fs::write(models.join("u2net.onnx"), b"").unwrap();
        ModelRegistry::with_loader(
            models,
            Box::new(
                move |_: &'static ModelSpec, _: &Path| -> Result<Box<dyn SegmentationModel>> {
                    started_tx.send(()).unwrap();
                    let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(10));
                    Ok(Box::new(GreenScreen))
                },
            ),
        )
    });

    let removal = async {
        let form = image_form("scene.png", scene_png(40, 40)).add_text("model", "u2net");
        app.server.post("/api/remove-background").multipart(form).await
    };
    let health = async {
        tokio::task::spawn_blocking(move || started_rx.recv_timeout(Duration::from_secs(10)))
            .await
            .unwrap()
            .unwrap();

        let start = Instant::now();
        let response = app.server.get("/api/health").await;
        let elapsed = start.elapsed();
        release_tx.send(()).unwrap();
        (response, elapsed)
    };
    let (removal, (health, elapsed)) = tokio::join!(removal, health);

    assert_eq!(health.status_code(), 200);
    assert!(elapsed < Duration::from_secs(2), "health took {elapsed:?}");
    assert_eq!(removal.status_code(), 200, "{}", removal.text());
    let body: Value = removal.json();
    assert_eq!(body["model_used"], "green");
}

#[tokio::test]
async fn models_lists_catalog_and_aliases() {
    let app = test_app();
    let body: Value = app.server.get("/api/models").await.json();

    let u2net = &body["available_models"]["u2net"];
    assert_eq!(u2net["available"], false);
    assert_eq!(u2net["loaded"], false);
    assert_eq!(u2net["input_size"], json!([320, 320]));
    assert_eq!(body["aliases"]["general"], "u2net");
    assert_eq!(body["aliases"]["human"], "u2net_human_seg");
    assert_eq!(body["default"], "green");
}

#[tokio::test]
async fn remove_background_keeps_dimensions() {
    let app = test_app();
    let form = image_form("scene.png", scene_png(120, 80)).add_text("include_mask", "true");
    let body = upload(&app, form).await;

    assert_eq!(body["success"], true);
    assert_eq!(body["model_used"], "green");
    assert_eq!(body["image_size"], json!([120, 80]));

    let cutout = decode_data_url(body["image"].as_str().unwrap());
    assert_eq!(cutout.dimensions(), (120, 80));
    assert!(cutout.color().has_alpha());
    let cutout = cutout.to_rgba8();
    assert_eq!(cutout.get_pixel(1, 1)[3], 0);
    assert!(cutout.get_pixel(60, 40)[3] >= 250);

    let mask = decode_data_url(body["mask"].as_str().unwrap());
    assert_eq!(mask.dimensions(), (120, 80));

    let id = body["result_id"].as_str().unwrap();
    assert_eq!(body["download_url"], format!("/api/download/{id}"));
    assert_eq!(body["mask_url"], format!("/api/mask/{id}"));
}

#[tokio::test]
async fn remove_background_file_returns_png_with_headers() {
    let app = test_app();
    let response = app
        .server
        .post("/api/remove-background-file")
        .multipart(image_form("holiday photo.png", scene_png(50, 30)))
        .await;
    assert_eq!(response.status_code(), 200);

    assert_eq!(response.header("content-type"), "image/png");
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=\"bg_removed_holiday_photo.png\""
    );
    assert_eq!(response.header("x-model-used"), "green");
    assert_eq!(response.header("x-image-size"), "50x30");

    let png = image::load_from_memory(response.as_bytes()).unwrap();
    assert_eq!(png.dimensions(), (50, 30));
}

#[tokio::test]
async fn rejects_bad_uploads() {
    let app = test_app();

    let response = app
        .server
        .post("/api/remove-background")
        .multipart(image_form("notes.txt", b"hello".to_vec()))
        .await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().starts_with("File type not supported"));

    let response = app
        .server
        .post("/api/remove-background")
        .multipart(MultipartForm::new().add_text("model", "green"))
        .await;
    assert_eq!(response.status_code(), 400);

    let response = app
        .server
        .post("/api/remove-background")
        .multipart(image_form("broken.png", b"definitely not a png".to_vec()))
        .await;
    assert_eq!(response.status_code(), 400);

    let response = app
        .server
        .post("/api/remove-background")
        .multipart(image_form("scene.png", scene_png(10, 10)).add_text("feather_amount", "50"))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn oversized_upload_is_413() {
    let app = test_app();
    let response = app
        .server
        .post("/api/remove-background")
        .multipart(image_form("big.png", vec![0u8; MAX_FILE_SIZE + 1]))
        .await;
    assert_eq!(response.status_code(), 413);
}

#[tokio::test]
async fn model_errors_map_to_statuses() {
    let app = test_app();

    let response = app
        .server
        .post("/api/remove-background")
        .multipart(image_form("scene.png", scene_png(10, 10)).add_text("model", "deeplab"))
        .await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["error"], "Model deeplab not supported");

    // Known model whose file is not on disk
    let response = app
        .server
        .post("/api/remove-background")
        .multipart(image_form("scene.png", scene_png(10, 10)).add_text("model", "general"))
        .await;
    assert_eq!(response.status_code(), 503);
}

#[tokio::test]
async fn missing_results_are_404() {
    let app = test_app();
    for path in [
        "/api/download/nonexistent.png",
        "/api/download/6f1c1f9e-3b1a-4d8e-9f57-0a0a0a0a0a0a",
        "/api/mask/nonexistent",
        "/api/preview/nonexistent",
    ] {
        let response = app.server.get(path).await;
        assert_eq!(response.status_code(), 404, "{path}");
        let body: Value = response.json();
        assert_eq!(body["error"], "File not found or expired");
    }

    let response = app
        .server
        .post("/api/edit-mask")
        .json(&json!({ "file_id": "nonexistent", "edits": [] }))
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn stored_results_can_be_downloaded_and_previewed() {
    let app = test_app();
    let body = upload(&app, image_form("scene.png", scene_png(800, 200))).await;
    let id = body["result_id"].as_str().unwrap();

    let response = app.server.get(&format!("/api/download/{id}")).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(
        response.header("content-disposition"),
        format!("attachment; filename=\"no_background_{id}.png\"").as_str()
    );
    let result = image::load_from_memory(response.as_bytes()).unwrap();
    assert_eq!(result.dimensions(), (800, 200));

    let response = app.server.get(&format!("/api/mask/{id}")).await;
    assert_eq!(response.status_code(), 200);
    let mask = image::load_from_memory(response.as_bytes()).unwrap();
    assert_eq!(mask.dimensions(), (800, 200));

    let preview: Value = app.server.get(&format!("/api/preview/{id}")).await.json();
    assert_eq!(preview["success"], true);
    let thumb = decode_data_url(preview["preview"].as_str().unwrap());
    assert_eq!(thumb.dimensions(), (400, 100));
}

#[tokio::test]
async fn batch_reports_each_file() {
    let app = test_app();
    let form = MultipartForm::new()
        .add_part("images", png_part("a.png", scene_png(20, 20)))
        .add_part("images", png_part("b.txt", b"nope".to_vec()))
        .add_part("images", png_part("c.png", scene_png(30, 10)));

    let response = app.server.post("/api/batch-process").multipart(form).await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["total_processed"], 2);
    assert_eq!(body["total_failed"], 1);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["filename"], "a.png");
    assert_eq!(results[0]["success"], true);
    assert!(results[0]["result_id"].is_string());
    assert_eq!(results[1]["success"], false);
    assert!(results[1]["error"].as_str().unwrap().contains("not supported"));
    assert!(results[1].get("result_id").is_none());
}

#[tokio::test]
async fn batch_limits_file_count() {
    let app = test_app();
    let mut form = MultipartForm::new();
    for i in 0..4 {
        form = form.add_part("files", png_part(&format!("{i}.png"), scene_png(8, 8)));
    }
    let response = app.server.post("/api/batch-remove").multipart(form).await;
    assert_eq!(response.status_code(), 400);

    let response = app
        .server
        .post("/api/batch-process")
        .multipart(MultipartForm::new().add_text("model", "green"))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn edit_mask_paints_onto_stored_result() {
    let app = test_app();
    let form = image_form("scene.png", scene_png(40, 40)).add_text("post_process", "false");
    let body = upload(&app, form).await;
    let id = body["result_id"].as_str().unwrap();

    let response = app
        .server
        .post("/api/edit-mask")
        .json(&json!({
            "file_id": id,
            "edits": [
                { "type": "add", "coordinates": [{ "x": 3, "y": 3, "radius": 2 }] },
                { "type": "remove", "coordinates": [{ "x": 20, "y": 20 }] }
            ]
        }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Mask updated successfully");
    assert_eq!(body["edits_applied"], 2);

    let edited = decode_data_url(body["image"].as_str().unwrap()).to_rgba8();
    assert_eq!(edited.get_pixel(3, 3)[3], 255);
    assert_eq!(edited.get_pixel(20, 20)[3], 0);
    assert_eq!(edited.get_pixel(38, 38)[3], 0);

    // The edit is persisted
    let response = app.server.get(&format!("/api/mask/{id}")).await;
    let mask = image::load_from_memory(response.as_bytes()).unwrap().to_luma8();
    assert_eq!(mask.get_pixel(3, 3)[0], 255);
    assert_eq!(mask.get_pixel(20, 20)[0], 0);
}

#[tokio::test]
async fn edit_mask_ignores_strokes_off_the_image() {
    let app = test_app();
    let body = upload(&app, image_form("scene.png", scene_png(40, 40))).await;
    let id = body["result_id"].as_str().unwrap();

    let response = app
        .server
        .post("/api/edit-mask")
        .json(&json!({
            "file_id": id,
            "edits": [
                { "type": "add", "coordinates": [
                    { "x": 2147483640, "y": 10, "radius": 50 },
                    { "x": 10, "y": -2147483640, "radius": 50 }
                ] }
            ]
        }))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    let body: Value = response.json();
    assert_eq!(body["edits_applied"], 0);
}

#[tokio::test]
async fn edit_mask_rejects_malformed_json() {
    let app = test_app();
    let response = app
        .server
        .post("/api/edit-mask")
        .json(&json!({ "file_id": "x", "edits": [{ "type": "smudge" }] }))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn refine_mask_dilates() {
    let app = test_app();
    let mut mask = GrayImage::new(21, 21);
    mask.put_pixel(10, 10, Luma([255]));
    let form = MultipartForm::new()
        .add_part("mask", png_part("mask.png", encode(&DynamicImage::ImageLuma8(mask))))
        .add_text("dilate_iterations", "2")
        .add_text("erode_iterations", "0");

    let response = app.server.post("/api/refine-mask").multipart(form).await;
    assert_eq!(response.status_code(), 200);
    let refined = image::load_from_memory(response.as_bytes()).unwrap().to_luma8();
    assert_eq!(refined.get_pixel(12, 12)[0], 255);
    assert_eq!(refined.get_pixel(13, 10)[0], 0);

    let form = MultipartForm::new()
        .add_part("mask", png_part("mask.png", scene_png(4, 4)))
        .add_text("dilate_iterations", "21");
    let response = app.server.post("/api/refine-mask").multipart(form).await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn cleanup_keeps_fresh_results() {
    let app = test_app();
    let body = upload(&app, image_form("scene.png", scene_png(10, 10))).await;
    let id = body["result_id"].as_str().unwrap();

    let response = app.server.post("/api/cleanup").await;
    assert_eq!(response.status_code(), 200);
    let cleanup: Value = response.json();
    assert_eq!(cleanup["success"], true);
    assert_eq!(cleanup["removed"], 0);

    let response = app.server.get(&format!("/api/download/{id}")).await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn warmup_reports_loaded_models() {
    let app = test_app();
    let body: Value = app.server.post("/api/warmup").await.json();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["loaded"], json!(["green"]));
}
