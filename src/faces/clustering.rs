use anyhow::{bail, Result};

use super::ClusteringEngine;

/// Label for a vector that belongs to no cluster
pub const NOISE_LABEL: i32 = -1;

const UNVISITED: i32 = -2;

/// Density-based clustering (DBSCAN) with Euclidean distance.
///
/// A vector with at least `min_size` vectors (itself included) within `eps`
/// is a core point; clusters grow through chains of core points. Labels are
/// numbered in the order clusters are discovered while walking the input, so
/// the cluster of the first vector is always `0`. With `min_size == 1` every
/// vector is a core point and no noise is produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dbscan;

impl ClusteringEngine for Dbscan {
    fn cluster(&self, vectors: &[Vec<f32>], eps: f32, min_size: usize) -> Result<Vec<i32>> {
        if !eps.is_finite() || eps <= 0.0 {
            bail!("Cluster distance threshold must be positive, got {}", eps);
        }
        if min_size == 0 {
            bail!("Minimum cluster size must be at least 1");
        }
        if let Some(first) = vectors.first() {
            if let Some(bad) = vectors.iter().position(|v| v.len() != first.len()) {
                bail!(
                    "Embedding {} has dimension {}, expected {}",
                    bad,
                    vectors[bad].len(),
                    first.len()
                );
            }
        }

        let mut labels = vec![UNVISITED; vectors.len()];
        let mut next_label = 0;

        for i in 0..vectors.len() {
            if labels[i] != UNVISITED {
                continue;
            }

            let neighbors = region_query(vectors, i, eps);
            if neighbors.len() < min_size {
                labels[i] = NOISE_LABEL;
                continue;
            }

            let label = next_label;
            next_label += 1;
            labels[i] = label;

            let mut seeds = neighbors;
            let mut cursor = 0;
            while cursor < seeds.len() {
                let j = seeds[cursor];
                cursor += 1;

                if labels[j] == NOISE_LABEL {
                    // Border point: reachable, but does not expand the cluster
                    labels[j] = label;
                    continue;
                }
                if labels[j] != UNVISITED {
                    continue;
                }

                labels[j] = label;
                let expansion = region_query(vectors, j, eps);
                if expansion.len() >= min_size {
                    seeds.extend(expansion);
                }
            }
        }

        Ok(labels)
    }
}

/// Indices of every vector within `eps` of `vectors[idx]`, itself included
fn region_query(vectors: &[Vec<f32>], idx: usize, eps: f32) -> Vec<usize> {
    let point = &vectors[idx];
    vectors
        .iter()
        .enumerate()
        .filter(|(_, other)| euclidean_distance(point, other) <= eps)
        .map(|(i, _)| i)
        .collect()
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert_eq!(euclidean_distance(&[1.0], &[1.0]), 0.0);
        assert_eq!(euclidean_distance(&[1.0], &[1.0, 2.0]), f32::MAX);
    }

    #[test]
    fn test_labels_follow_discovery_order() {
        let vectors = vec![
            vec![0.0, 0.0],
            vec![10.0, 10.0],
            vec![0.1, 0.0],
            vec![20.0, 20.0],
            vec![10.0, 10.2],
        ];
        let labels = Dbscan.cluster(&vectors, 0.5, 1).unwrap();
        assert_eq!(labels, vec![0, 1, 0, 2, 1]);
    }

    #[test]
    fn test_chains_join_one_cluster() {
        // Ends are 0.8 apart but linked through the middle point
        let vectors = vec![vec![0.0], vec![0.4], vec![0.8]];
        assert_eq!(Dbscan.cluster(&vectors, 0.45, 1).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_min_size_one_never_yields_noise() {
        let vectors: Vec<Vec<f32>> = (0..6).map(|i| vec![i as f32 * 100.0]).collect();
        let labels = Dbscan.cluster(&vectors, 1.0, 1).unwrap();
        assert!(labels.iter().all(|&l| l != NOISE_LABEL));
        assert_eq!(labels, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_sparse_points_are_noise_with_larger_min_size() {
        let vectors = vec![vec![0.0], vec![0.1], vec![0.2], vec![50.0]];
        let labels = Dbscan.cluster(&vectors, 0.15, 2).unwrap();
        assert_eq!(labels, vec![0, 0, 0, NOISE_LABEL]);
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        assert!(Dbscan.cluster(&[vec![0.0]], 0.0, 1).is_err());
        assert!(Dbscan.cluster(&[vec![0.0]], 0.5, 0).is_err());
        assert!(Dbscan.cluster(&[vec![0.0], vec![0.0, 1.0]], 0.5, 1).is_err());
        assert!(Dbscan.cluster(&[], 0.5, 1).unwrap().is_empty());
    }
}
