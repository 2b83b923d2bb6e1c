//! Scan orchestration: walks a directory tree on a background worker,
//! ingests every image file one at a time, then rebuilds people once all
//! files are in.

pub mod discovery;
pub mod hashing;
pub mod ingest;
pub mod metadata;
pub mod thumbnails;

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use thiserror::Error;

use crate::config::Config;
use crate::db::{Database, ScanRunStatus};
use crate::faces::{ClusteringEngine, FaceExtractor, IdentityReconciler, ReconcileSummary};

pub use discovery::discover_images;
pub use hashing::fingerprint_file;
pub use ingest::{FileOutcome, Ingestor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    #[default]
    Idle,
    Scanning,
    Done,
    /// The run aborted; `message` says why
    Failed,
}

/// Polled view of the current or last scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub status: ScanStatus,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

impl ScanProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return if self.status == ScanStatus::Done { 100 } else { 0 };
        }
        ((self.current.min(self.total) * 100) / self.total) as u8
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, ScanStatus::Done | ScanStatus::Failed)
    }
}

/// Why `start_scan` refused to start
#[derive(Debug, Error)]
pub enum ScanRejected {
    #[error("a scan is already in progress")]
    AlreadyScanning,
    #[error("directory not found: {}", .0.display())]
    PathNotFound(PathBuf),
    #[error("could not start scan worker: {0}")]
    WorkerUnavailable(#[from] std::io::Error),
}

/// Tally of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub files: usize,
    pub registered: usize,
    pub without_faces: usize,
    pub duplicates: usize,
    pub path_conflicts: usize,
    pub unreadable: usize,
    /// Files abandoned because of a store error
    pub failed: usize,
    pub faces: usize,
    pub people: Option<ReconcileSummary>,
}

impl ScanSummary {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Registered { faces, .. } => {
                self.registered += 1;
                self.faces += faces;
            }
            FileOutcome::RegisteredWithoutFaces { .. } => self.without_faces += 1,
            FileOutcome::Duplicate => self.duplicates += 1,
            FileOutcome::PathAlreadyRegistered => self.path_conflicts += 1,
            FileOutcome::Unreadable { .. } => self.unreadable += 1,
        }
    }

    pub fn new_images(&self) -> usize {
        self.registered + self.without_faces
    }

    pub fn skipped(&self) -> usize {
        self.duplicates + self.path_conflicts + self.unreadable + self.failed
    }

    fn describe(&self) -> String {
        let people = self.people.as_ref().map_or(0, |p| p.people);
        format!(
            "Scan complete: {} files, {} new images, {} new faces, {} skipped, {} people",
            self.files,
            self.new_images(),
            self.faces,
            self.skipped(),
            people
        )
    }
}

/// Runs at most one scan at a time and publishes its progress.
///
/// Cloning is cheap and every clone shares the same worker state, so one
/// orchestrator can be handed to many pollers.
#[derive(Clone)]
pub struct ScanOrchestrator {
    shared: Arc<Shared>,
}

struct Shared {
    config: Config,
    extractor: Arc<dyn FaceExtractor>,
    engine: Arc<dyn ClusteringEngine>,
    progress: RwLock<ScanProgress>,
    last_summary: RwLock<Option<ScanSummary>>,
    active: AtomicBool,
}

impl ScanOrchestrator {
    pub fn new(config: Config, extractor: Arc<dyn FaceExtractor>, engine: Arc<dyn ClusteringEngine>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                extractor,
                engine,
                progress: RwLock::new(ScanProgress::default()),
                last_summary: RwLock::new(None),
                active: AtomicBool::new(false),
            }),
        }
    }

    /// Start scanning `root` on a background thread. Rejections leave the
    /// published progress untouched.
    pub fn start_scan(&self, root: &Path) -> std::result::Result<JoinHandle<()>, ScanRejected> {
        if !root.is_dir() {
            return Err(ScanRejected::PathNotFound(root.to_path_buf()));
        }
        let root = root
            .canonicalize()
            .map_err(|_| ScanRejected::PathNotFound(root.to_path_buf()))?;

        if self
            .shared
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScanRejected::AlreadyScanning);
        }

        self.shared.set_progress(ScanProgress {
            status: ScanStatus::Scanning,
            current: 0,
            total: 0,
            message: format!("Scanning {}", root.display()),
        });

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("facesort-scan".to_string())
            .spawn(move || {
                let mut guard = ActiveGuard {
                    shared: Arc::clone(&shared),
                    finished: None,
                };
                guard.finished = Some(shared.run(&root));
            });

        spawned.map_err(|e| {
            self.shared.update_progress(|p| {
                p.status = ScanStatus::Failed;
                p.message = format!("Could not start scan: {}", e);
            });
            self.shared.active.store(false, Ordering::SeqCst);
            ScanRejected::from(e)
        })
    }

    pub fn get_progress(&self) -> ScanProgress {
        self.shared
            .progress
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Tally of the most recent run that got as far as opening the store
    pub fn last_summary(&self) -> Option<ScanSummary> {
        self.shared
            .last_summary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Publishes the terminal status and releases the single-scan slot when the
/// worker ends, including by panic. Both happen under the progress lock, so a
/// poller that sees `done` or `failed` can start the next scan at once.
struct ActiveGuard {
    shared: Arc<Shared>,
    finished: Option<(ScanStatus, String)>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let (status, message) = self
            .finished
            .take()
            .unwrap_or_else(|| (ScanStatus::Failed, "Scan worker stopped unexpectedly".to_string()));

        let mut progress = self.shared.progress.write().unwrap_or_else(PoisonError::into_inner);
        progress.status = status;
        progress.message = message;
        self.shared.active.store(false, Ordering::SeqCst);
    }
}

impl Shared {
    fn set_progress(&self, progress: ScanProgress) {
        self.update_progress(|p| *p = progress);
    }

    fn update_progress(&self, f: impl FnOnce(&mut ScanProgress)) {
        let mut progress = self.progress.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut progress);
    }

    /// Final status and message of the run
    fn run(&self, root: &Path) -> (ScanStatus, String) {
        tracing::info!(root = %root.display(), "Scan started");

        let mut summary = ScanSummary::default();
        let result = self.execute(root, &mut summary);
        *self.last_summary.write().unwrap_or_else(PoisonError::into_inner) = Some(summary.clone());

        match result {
            Ok(()) => {
                tracing::info!(
                    files = summary.files,
                    new_images = summary.new_images(),
                    new_faces = summary.faces,
                    skipped = summary.skipped(),
                    failed = summary.failed,
                    "Scan finished"
                );
                (ScanStatus::Done, summary.describe())
            }
            Err(e) => {
                tracing::error!(root = %root.display(), error = %format!("{:#}", e), "Scan aborted");
                (ScanStatus::Failed, format!("Scan failed: {:#}", e))
            }
        }
    }

    fn execute(&self, root: &Path, summary: &mut ScanSummary) -> Result<()> {
        let db = Database::open(&self.config.db_path)?;
        db.initialize()?;

        let scan_id = db.begin_scan(root)?;
        let result = self.scan_tree(&db, root, summary);

        let status = if result.is_ok() {
            ScanRunStatus::Completed
        } else {
            ScanRunStatus::Failed
        };
        if let Err(e) = db.finish_scan(scan_id, summary.files, summary.new_images(), summary.faces, status) {
            tracing::warn!(scan_id, error = %e, "Could not record scan result");
        }

        result
    }

    fn scan_tree(&self, db: &Database, root: &Path, summary: &mut ScanSummary) -> Result<()> {
        let files = discover_images(root, &self.config.scanner.image_extensions)?;
        summary.files = files.len();
        self.update_progress(|p| p.total = files.len());

        let ingestor = Ingestor::new(&self.config, Arc::clone(&self.extractor));

        for path in &files {
            match ingestor.ingest(db, path) {
                Ok(outcome) => {
                    log_outcome(path, &outcome);
                    summary.record(&outcome);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %format!("{:#}", e), "Failed to store file");
                    summary.failed += 1;
                }
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            self.update_progress(|p| {
                p.current += 1;
                p.message = format!("Processed {}", name);
            });
        }

        self.update_progress(|p| p.message = "Grouping faces".to_string());
        let reconciler = IdentityReconciler::from_config(&self.config.faces);
        summary.people = Some(reconciler.reconcile(db, self.engine.as_ref())?);

        Ok(())
    }
}

fn log_outcome(path: &Path, outcome: &FileOutcome) {
    match outcome {
        FileOutcome::Registered { image_id, faces } => {
            tracing::debug!(path = %path.display(), image_id, faces, "Image registered")
        }
        FileOutcome::RegisteredWithoutFaces { image_id, reason } => {
            tracing::warn!(path = %path.display(), image_id, %reason, "Image registered without faces")
        }
        FileOutcome::Duplicate => tracing::debug!(path = %path.display(), "Known content, skipped"),
        FileOutcome::PathAlreadyRegistered => {
            tracing::warn!(path = %path.display(), "Content changed at a registered path, skipped")
        }
        FileOutcome::Unreadable { reason } => {
            tracing::warn!(path = %path.display(), %reason, "Unreadable file, skipped")
        }
    }
}
