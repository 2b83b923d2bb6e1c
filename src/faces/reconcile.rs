//! Rebuilds the person layer from a full reclustering of every stored face
//! while carrying human-chosen names across the rebuild.
//!
//! A pass runs in four steps:
//!
//! 1. Snapshot `face id -> name` for faces owned by visible persons whose
//!    name is not a placeholder. Nothing else survives the pass.
//! 2. Cluster the embedding of every face in the store.
//! 3. Delete all visible persons and detach their faces.
//! 4. Create one person per cluster. The name is the first snapshot hit
//!    among the cluster's faces (in face order), else the next
//!    `Unknown <n>` of this pass. The first face is the cover.
//!
//! Steps 3 and 4 share one transaction, so a failure anywhere leaves the
//! previous people untouched. Hidden persons are never deleted, but their
//! faces are reclustered like any other and end up in new persons.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashMap;

use super::{ClusteringEngine, NOISE_LABEL};
use crate::config::FaceConfig;
use crate::db::{is_placeholder_name, placeholder_name, Database};

/// Every face belongs to some person, so a lone face is a cluster of its own
const MIN_CLUSTER_SIZE: usize = 1;

#[derive(Debug, Clone)]
pub struct IdentityReconciler {
    eps: f32,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub faces: usize,
    pub people: usize,
    /// People that inherited a human-chosen name
    pub named: usize,
    /// People that received a fresh `Unknown <n>`
    pub placeholders: usize,
    /// Faces the engine left out of every cluster
    pub unclustered: usize,
}

impl IdentityReconciler {
    pub fn new(eps: f32) -> Self {
        Self { eps }
    }

    pub fn from_config(config: &FaceConfig) -> Self {
        Self::new(config.cluster_eps)
    }

    pub fn reconcile(&self, db: &Database, engine: &dyn ClusteringEngine) -> Result<ReconcileSummary> {
        let preserved: HashMap<i64, String> = db
            .visible_face_names()?
            .into_iter()
            .filter(|(_, name)| !is_placeholder_name(name))
            .collect();

        let (face_ids, vectors): (Vec<i64>, Vec<Vec<f32>>) =
            db.all_face_embeddings()?.into_iter().unzip();

        if let Some(first) = vectors.first() {
            if let Some(pos) = vectors.iter().position(|v| v.len() != first.len()) {
                bail!(
                    "Face {} has a {}-d embedding but face {} has {}-d; the corpus mixes extractors",
                    face_ids[pos],
                    vectors[pos].len(),
                    face_ids[0],
                    first.len()
                );
            }
        }

        let labels = if vectors.is_empty() {
            Vec::new()
        } else {
            engine.cluster(&vectors, self.eps, MIN_CLUSTER_SIZE)?
        };

        if labels.len() != face_ids.len() {
            bail!(
                "Clustering returned {} labels for {} faces",
                labels.len(),
                face_ids.len()
            );
        }

        let (clusters, unclustered) = group_by_label(&face_ids, &labels);
        tracing::debug!(
            faces = face_ids.len(),
            clusters = clusters.len(),
            preserved_names = preserved.len(),
            "Rebuilding people"
        );

        let mut summary = ReconcileSummary {
            faces: face_ids.len(),
            unclustered,
            ..ReconcileSummary::default()
        };

        let tx = db.transaction()?;
        let removed = db.purge_visible_people()?;

        for members in &clusters {
            let name = match members.iter().find_map(|id| preserved.get(id)) {
                Some(name) => {
                    summary.named += 1;
                    name.clone()
                }
                None => {
                    summary.placeholders += 1;
                    placeholder_name(summary.placeholders)
                }
            };

            let person_id = db.create_person(&name, members[0])?;
            db.assign_faces_to_person(person_id, members)?;
            summary.people += 1;
        }

        tx.commit()?;

        tracing::info!(
            removed,
            people = summary.people,
            named = summary.named,
            placeholders = summary.placeholders,
            "People rebuilt"
        );

        Ok(summary)
    }
}

/// Face ids grouped by label, clusters ordered by first appearance and
/// members kept in input order. Also returns how many faces were noise.
fn group_by_label(face_ids: &[i64], labels: &[i32]) -> (Vec<Vec<i64>>, usize) {
    let mut clusters: Vec<Vec<i64>> = Vec::new();
    let mut index_of: HashMap<i32, usize> = HashMap::new();
    let mut noise = 0;

    for (&face_id, &label) in face_ids.iter().zip(labels) {
        if label == NOISE_LABEL {
            noise += 1;
            continue;
        }
        let idx = *index_of.entry(label).or_insert_with(|| {
            clusters.push(Vec::new());
            clusters.len() - 1
        });
        clusters[idx].push(face_id);
    }

    (clusters, noise)
}
