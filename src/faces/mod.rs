//! Face handling: the two delegated algorithms (feature extraction and
//! clustering) behind narrow traits, the face thumbnail writer, and the
//! identity reconciler that rebuilds people from clusters.

pub mod avatars;
pub mod clustering;
pub mod detector;
pub mod reconcile;

use anyhow::Result;
use image::DynamicImage;

use crate::db::FaceBox;

pub use avatars::FaceAssetWriter;
pub use clustering::{euclidean_distance, Dbscan, NOISE_LABEL};
pub use detector::OnnxFaceExtractor;
pub use reconcile::{IdentityReconciler, ReconcileSummary};

/// A face found by an extractor
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: FaceBox,
    pub embedding: Vec<f32>,
}

/// Finds faces in decoded pixels and describes each with an embedding.
///
/// Every embedding an extractor produces must have the same dimension, since
/// reclustering compares new faces with everything stored before.
pub trait FaceExtractor: Send + Sync {
    fn extract(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>>;
}

/// Groups embeddings. Returns one label per input vector, in input order;
/// equal labels mean "same person". `-1` marks a vector left out of every
/// cluster, which cannot happen when `min_size` is 1.
pub trait ClusteringEngine: Send + Sync {
    fn cluster(&self, vectors: &[Vec<f32>], eps: f32, min_size: usize) -> Result<Vec<i32>>;
}
