use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Status of an individual file transfer
#[derive(Clone, Debug, PartialEq)]
pub enum FileStatus {
    Waiting,
    InProgress { completed: u32, total: u32 },
    Complete,
    Failed(String),
}

/// Progress info for a single file
#[derive(Clone, Debug, PartialEq)]
pub struct FileProgress {
    pub filename: String,
    pub total_chunks: u32,
    pub status: FileStatus,
}

/// Aggregate transfer progress published to whoever renders it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferProgress {
    pub files: Vec<FileProgress>,
    pub completed_files: usize,
    pub failed_files: usize,
    /// 0.0 - 100.0, capped at 99 until every file is done
    pub percent: f64,
}

impl TransferProgress {
    pub fn is_finished(&self) -> bool {
        !self.files.is_empty() && self.completed_files + self.failed_files >= self.files.len()
    }
}

/// Tracks transfer progress and pushes snapshots on a watch channel
#[derive(Clone)]
pub struct ProgressTracker {
    state: Arc<Mutex<TransferProgress>>,
    sender: Arc<watch::Sender<TransferProgress>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(TransferProgress::default());
        Self {
            state: Arc::new(Mutex::new(TransferProgress::default())),
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferProgress> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> TransferProgress {
        self.with_state(|s| s.clone())
    }

    pub fn init_files(&self, names: Vec<String>, totals: Vec<u32>) {
        self.update(|s| {
            s.files = names
                .into_iter()
                .zip(totals)
                .map(|(filename, total_chunks)| FileProgress {
                    filename,
                    total_chunks,
                    status: FileStatus::Waiting,
                })
                .collect();
            s.completed_files = 0;
            s.failed_files = 0;
        });
    }

    /// One more chunk of `file_index` done. Returns (completed, total) for that file.
    pub fn increment_file(&self, file_index: usize) -> (u32, u32) {
        let mut counts = (0, 0);
        self.update(|s| {
            if let Some(file) = s.files.get_mut(file_index) {
                let total = file.total_chunks;
                let completed = match file.status {
                    FileStatus::InProgress { completed, .. } => completed + 1,
                    _ => 1,
                };
                // total 0: length unknown up front (framed stream)
                let completed = if total == 0 { completed } else { completed.min(total) };
                file.status = FileStatus::InProgress { completed, total };
                counts = (completed, total);
            }
        });
        counts
    }

    pub fn file_complete(&self, file_index: usize) {
        self.update(|s| {
            if let Some(file) = s.files.get_mut(file_index) {
                if file.status != FileStatus::Complete {
                    file.status = FileStatus::Complete;
                    s.completed_files += 1;
                }
            }
        });
    }

    pub fn file_failed(&self, file_index: usize, reason: impl Into<String>) {
        let reason = reason.into();
        self.update(|s| {
            if let Some(file) = s.files.get_mut(file_index) {
                if !matches!(file.status, FileStatus::Failed(_)) {
                    if file.status == FileStatus::Complete {
                        s.completed_files -= 1;
                    }
                    file.status = FileStatus::Failed(reason);
                    s.failed_files += 1;
                }
            }
        });
    }

    fn with_state<T>(&self, f: impl FnOnce(&TransferProgress) -> T) -> T {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&*guard)
    }

    fn update(&self, f: impl FnOnce(&mut TransferProgress)) {
        let snapshot = {
            let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut *guard);
            guard.percent = overall_percent(&guard);
            guard.clone()
        };
        self.sender.send_replace(snapshot);
    }
}

fn overall_percent(progress: &TransferProgress) -> f64 {
    if progress.is_finished() {
        return 100.0;
    }

    let (done, total) = progress
        .files
        .iter()
        .fold((0u64, 0u64), |(done, total), file| {
            let finished = match file.status {
                FileStatus::Waiting => 0,
                FileStatus::InProgress { completed, .. } => completed as u64,
                FileStatus::Complete | FileStatus::Failed(_) => file.total_chunks as u64,
            };
            (done + finished, total + file.total_chunks as u64)
        });

    if total == 0 {
        return 0.0;
    }
    // Cap at 99% until explicit completion
    ((done as f64 / total as f64) * 100.0).min(99.0)
}
