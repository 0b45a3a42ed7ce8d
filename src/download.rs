use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use camino::Utf8PathBuf;
use chrono::Utc;
use tracing::{info, warn};

use crate::archive::{ArchiveClient, Expected};
use crate::error::MirrorError;

/// One unit of work for the batch downloader.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub item_id: String,
    pub expected_size: i64,
    pub expected_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStyle {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOutcome {
    pub downloaded: usize,
    pub mismatches: usize,
    pub bytes: u64,
}

/// Cumulative counters shared by all workers of one batch.
struct Progress {
    total_files: usize,
    total_bytes: u64,
    done_files: usize,
    done_bytes: u64,
    mismatches: usize,
    started: Instant,
}

impl Progress {
    fn new(total_files: usize, total_bytes: u64) -> Self {
        Self {
            total_files,
            total_bytes,
            done_files: 0,
            done_bytes: 0,
            mismatches: 0,
            started: Instant::now(),
        }
    }

    fn log(&self, style: ProgressStyle, item_id: &str) {
        let elapsed = self.started.elapsed().as_secs_f64().max(1e-6);
        let throughput = self.done_bytes as f64 / elapsed;
        let remaining_bytes = self.total_bytes.saturating_sub(self.done_bytes);
        // Linear extrapolation from the throughput so far.
        let eta_secs = if throughput > 0.0 {
            remaining_bytes as f64 / throughput
        } else {
            0.0
        };
        let completion = Utc::now() + chrono::Duration::seconds(eta_secs as i64);
        match style {
            ProgressStyle::Long => info!(
                item_id,
                files = format!("{}/{}", self.done_files, self.total_files),
                bytes = format!("{}/{}", self.done_bytes, self.total_bytes),
                elapsed_s = format!("{elapsed:.1}"),
                throughput_bps = format!("{throughput:.0}"),
                eta_s = format!("{eta_secs:.0}"),
                completion = %completion.to_rfc3339(),
                "downloaded"
            ),
            ProgressStyle::Short => info!(
                item_id,
                files = format!("{}/{}", self.done_files, self.total_files),
                eta_s = format!("{eta_secs:.0}"),
                "downloaded"
            ),
        }
    }
}

/// Drives the archive client over a list of items, one download each.
///
/// Name and size mismatches reported by the client are logged and counted
/// but do not fail the batch; any other client error aborts it.
pub struct BatchDownloader<'a, C: ArchiveClient> {
    client: &'a C,
    directory: Utf8PathBuf,
    style: ProgressStyle,
    /// Ascending-size ordering; a debug convenience that degrades the
    /// accuracy of the time estimate.
    order_by_size: bool,
    parallelism: usize,
}

impl<'a, C: ArchiveClient> BatchDownloader<'a, C> {
    pub fn new(client: &'a C, directory: Utf8PathBuf) -> Self {
        Self {
            client,
            directory,
            style: ProgressStyle::Long,
            order_by_size: false,
            parallelism: 1,
        }
    }

    pub fn style(mut self, style: ProgressStyle) -> Self {
        self.style = style;
        self
    }

    pub fn order_by_size(mut self, order: bool) -> Self {
        self.order_by_size = order;
        self
    }

    /// Bounded number of concurrent downloads; 1 disables parallelism.
    pub fn parallelism(mut self, workers: usize) -> Self {
        self.parallelism = workers.max(1);
        self
    }

    pub fn run(&self, jobs: &[DownloadJob]) -> Result<BatchOutcome, MirrorError> {
        let mut ordered: Vec<&DownloadJob> = jobs.iter().collect();
        if self.order_by_size {
            ordered.sort_by_key(|job| job.expected_size);
        }
        let total_bytes: u64 = ordered
            .iter()
            .map(|job| job.expected_size.max(0) as u64)
            .sum();
        let progress = Mutex::new(Progress::new(ordered.len(), total_bytes));

        if self.parallelism == 1 || ordered.len() <= 1 {
            for job in &ordered {
                self.fetch_one(job, &progress)?;
            }
        } else {
            self.run_parallel(&ordered, &progress)?;
        }

        let progress = progress.into_inner().map_err(|_| {
            MirrorError::Filesystem("download progress lock poisoned".to_string())
        })?;
        Ok(BatchOutcome {
            downloaded: progress.done_files,
            mismatches: progress.mismatches,
            bytes: progress.done_bytes,
        })
    }

    fn run_parallel(
        &self,
        jobs: &[&DownloadJob],
        progress: &Mutex<Progress>,
    ) -> Result<(), MirrorError> {
        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let failure: Mutex<Option<MirrorError>> = Mutex::new(None);
        let workers = self.parallelism.min(jobs.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if abort.load(Ordering::Relaxed) {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(job) = jobs.get(index) else {
                        break;
                    };
                    if let Err(err) = self.fetch_one(job, progress) {
                        abort.store(true, Ordering::Relaxed);
                        if let Ok(mut slot) = failure.lock() {
                            slot.get_or_insert(err);
                        }
                        break;
                    }
                });
            }
        });

        match failure.into_inner() {
            Ok(Some(err)) => Err(err),
            Ok(None) => Ok(()),
            Err(_) => Err(MirrorError::Filesystem(
                "download failure lock poisoned".to_string(),
            )),
        }
    }

    fn fetch_one(&self, job: &DownloadJob, progress: &Mutex<Progress>) -> Result<(), MirrorError> {
        let expected = Expected {
            file_name: job.expected_name.clone(),
            file_size: Some(job.expected_size),
        };
        let result = self
            .client
            .download_latest(&job.item_id, &self.directory, Some(&expected));
        let mut progress = progress
            .lock()
            .map_err(|_| MirrorError::Filesystem("download progress lock poisoned".to_string()))?;
        // Byte counters reflect what was actually written, not the
        // listing's expectation, so the throughput stays honest across
        // mismatches.
        match result {
            Ok(download) => {
                progress.done_files += 1;
                progress.done_bytes += download.bytes;
                progress.log(self.style, &job.item_id);
                Ok(())
            }
            Err(MirrorError::NameMismatch { expected, actual }) => {
                warn!(
                    item_id = %job.item_id,
                    expected = %expected,
                    actual = %actual,
                    "downloaded name disagrees with listing"
                );
                progress.mismatches += 1;
                progress.done_files += 1;
                Ok(())
            }
            Err(MirrorError::SizeMismatch { expected, actual }) => {
                warn!(
                    item_id = %job.item_id,
                    expected,
                    actual,
                    "downloaded size disagrees with listing"
                );
                progress.mismatches += 1;
                progress.done_files += 1;
                progress.done_bytes += actual.max(0) as u64;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
