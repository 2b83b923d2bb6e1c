use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use super::{DetectedFace, FaceExtractor};
use crate::db::FaceBox;

const DETECTION_MODEL_FILE: &str = "ultraface-320.onnx";
const DETECTION_MODEL_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";

const EMBEDDING_MODEL_FILE: &str = "arcface-resnet100.onnx";
const EMBEDDING_MODEL_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx";

/// Face extractor backed by ONNX Runtime: UltraFace finds faces, ArcFace
/// turns each one into an L2-normalised 512-d embedding.
///
/// Models are downloaded into `models_dir` and loaded on first use.
pub struct OnnxFaceExtractor {
    models_dir: PathBuf,
    detection: OnceLock<Mutex<Session>>,
    embedding: OnceLock<Mutex<Session>>,
}

impl OnnxFaceExtractor {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            detection: OnceLock::new(),
            embedding: OnceLock::new(),
        }
    }

    /// Download (if needed) and load both models up front
    pub fn init_models(&self) -> Result<()> {
        self.detection_session()?;
        self.embedding_session()?;
        Ok(())
    }

    fn detection_session(&self) -> Result<MutexGuard<'_, Session>> {
        lock_session(&self.detection, || {
            load_session(&self.models_dir, DETECTION_MODEL_FILE, DETECTION_MODEL_URL)
        })
    }

    fn embedding_session(&self) -> Result<MutexGuard<'_, Session>> {
        lock_session(&self.embedding, || {
            load_session(&self.models_dir, EMBEDDING_MODEL_FILE, EMBEDDING_MODEL_URL)
        })
    }
}

impl FaceExtractor for OnnxFaceExtractor {
    fn extract(&self, img: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let (width, height) = img.dimensions();

        let face_boxes = {
            let mut detection = self.detection_session()?;
            run_ultraface_detection(&mut detection, img)?
        };

        if face_boxes.is_empty() {
            return Ok(Vec::new());
        }

        let mut embedding_model = self.embedding_session()?;
        let mut detected_faces = Vec::with_capacity(face_boxes.len());

        for (bbox, _confidence) in face_boxes {
            if bbox.width() <= 0 || bbox.height() <= 0 {
                continue;
            }

            let face_crop = crop_for_embedding(img, &bbox, width, height);
            match run_arcface_embedding(&mut embedding_model, &face_crop) {
                Ok(embedding) => detected_faces.push(DetectedFace { bbox, embedding }),
                Err(e) => {
                    // A face without an embedding cannot be clustered, so it is dropped
                    tracing::warn!(?bbox, error = %e, "Face embedding failed");
                }
            }
        }

        Ok(detected_faces)
    }
}

fn lock_session<'a>(
    cell: &'a OnceLock<Mutex<Session>>,
    load: impl FnOnce() -> Result<Session>,
) -> Result<MutexGuard<'a, Session>> {
    let mutex = match cell.get() {
        Some(mutex) => mutex,
        None => {
            let session = load()?;
            // Another thread may have won the race; either session is fine
            let _ = cell.set(Mutex::new(session));
            cell.get().ok_or_else(|| anyhow!("Model session not initialized"))?
        }
    };

    mutex
        .lock()
        .map_err(|e| anyhow!("Failed to lock model session: {}", e))
}

fn load_session(models_dir: &Path, filename: &str, url: &str) -> Result<Session> {
    let model_path = ensure_model(models_dir, filename, url)?;

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(&model_path)?;

    Ok(session)
}

/// Download a model file if it doesn't exist
fn ensure_model(models_dir: &Path, filename: &str, url: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        let partial = model_path.with_extension("onnx.part");
        let mut file = std::fs::File::create(&partial)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        std::fs::rename(&partial, &model_path)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

/// Run UltraFace detection model
fn run_ultraface_detection(session: &mut Session, img: &DynamicImage) -> Result<Vec<(FaceBox, f32)>> {
    const INPUT_WIDTH: u32 = 320;
    const INPUT_HEIGHT: u32 = 240;
    const CONFIDENCE_THRESHOLD: f32 = 0.7;
    const NMS_THRESHOLD: f32 = 0.3;

    let (orig_width, orig_height) = img.dimensions();

    let resized = img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // NCHW, normalised to roughly [-1, 1]
    let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * INPUT_WIDTH as usize + x as usize;
        for channel in 0..3 {
            input_data[channel * plane + idx] = (pixel[channel] as f32 - 127.0) / 128.0;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["input" => input_tensor])?;

    let scores_value = outputs.get("scores").ok_or_else(|| anyhow!("No scores output"))?;
    let boxes_value = outputs.get("boxes").ok_or_else(|| anyhow!("No boxes output"))?;

    let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
    let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

    // scores: [1, anchors, 2] (background, face); boxes: [1, anchors, 4] normalised corners
    let num_anchors = scores_shape[1] as usize;
    let mut face_boxes = Vec::new();

    for i in 0..num_anchors {
        let confidence = scores_data[i * 2 + 1];
        if confidence <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let scale = |v: f32, max: u32| ((v * max as f32) as i32).clamp(0, max as i32);
        let bbox = FaceBox {
            left: scale(boxes_data[i * 4], orig_width),
            top: scale(boxes_data[i * 4 + 1], orig_height),
            right: scale(boxes_data[i * 4 + 2], orig_width),
            bottom: scale(boxes_data[i * 4 + 3], orig_height),
        };

        face_boxes.push((bbox, confidence));
    }

    Ok(nms(face_boxes, NMS_THRESHOLD))
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut boxes: Vec<(FaceBox, f32)>, threshold: f32) -> Vec<(FaceBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(FaceBox, f32)> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|(kept, _)| compute_iou(kept, &candidate.0) <= threshold) {
            keep.push(candidate);
        }
    }

    keep
}

/// Intersection over union of two boxes
fn compute_iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let overlap = FaceBox {
        top: a.top.max(b.top),
        right: a.right.min(b.right),
        bottom: a.bottom.min(b.bottom),
        left: a.left.max(b.left),
    };

    let intersection = overlap.area() as f32;
    let union = (a.area() + b.area()) as f32 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Face region with 20% padding on every side, as ArcFace expects some context
fn crop_for_embedding(img: &DynamicImage, bbox: &FaceBox, img_width: u32, img_height: u32) -> DynamicImage {
    let padding_x = (bbox.width() as f32 * 0.2) as i32;
    let padding_y = (bbox.height() as f32 * 0.2) as i32;

    let x = (bbox.left - padding_x).clamp(0, img_width.saturating_sub(1) as i32) as u32;
    let y = (bbox.top - padding_y).clamp(0, img_height.saturating_sub(1) as i32) as u32;
    let w = ((bbox.width() + padding_x * 2).max(1) as u32).min(img_width - x);
    let h = ((bbox.height() + padding_y * 2).max(1) as u32).min(img_height - y);

    img.crop_imm(x, y, w.max(1), h.max(1))
}

/// Run ArcFace embedding model
fn run_arcface_embedding(session: &mut Session, face_img: &DynamicImage) -> Result<Vec<f32>> {
    const INPUT_SIZE: u32 = 112;

    let resized = face_img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * INPUT_SIZE as usize + x as usize;
        for channel in 0..3 {
            input_data[channel * plane + idx] = (pixel[channel] as f32 - 127.5) / 127.5;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    // The ArcFace export names its input "data"
    let outputs = session.run(ort::inputs!["data" => input_tensor])?;

    let embedding_output = outputs.iter().next().ok_or_else(|| anyhow!("No embedding output"))?;
    let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

    Ok(l2_normalize(embedding_data.to_vec()))
}

fn l2_normalize(mut embedding: Vec<f32>) -> Vec<f32> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        embedding.iter_mut().for_each(|x| *x /= norm);
    }
    embedding
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(left: i32, top: i32, side: i32) -> FaceBox {
        FaceBox { top, right: left + side, bottom: top + side, left }
    }

    #[test]
    fn test_iou() {
        let a = square(0, 0, 10);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 0.001);
        assert!(compute_iou(&a, &square(20, 20, 10)).abs() < 0.001);
        // 5x10 overlap over 150 union
        assert!((compute_iou(&a, &square(5, 0, 10)) - 50.0 / 150.0).abs() < 0.001);
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlapping() {
        let boxes = vec![
            (square(0, 0, 10), 0.8),
            (square(1, 1, 10), 0.95),
            (square(50, 50, 10), 0.75),
        ];
        let kept = nms(boxes, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, square(1, 1, 10));
        assert_eq!(kept[1].0, square(50, 50, 10));
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_embedding_crop_stays_inside_image() {
        let img = DynamicImage::new_rgb8(100, 80);
        let cropped = crop_for_embedding(&img, &square(90, 70, 20), 100, 80);
        // Padded origin (86, 66) leaves 14 pixels to each far edge
        assert_eq!(cropped.dimensions(), (14, 14));
    }
}
