use std::fs;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::archive::ArchiveClient;
use crate::download::{BatchDownloader, DownloadJob, ProgressStyle};
use crate::error::MirrorError;
use crate::listing::listing_to_table;
use crate::placement::TdnFallback;
use crate::relocate::{relocate_tree, RelocateMode, RelocateOptions};
use crate::remove::RemovalHandler;
use crate::scan::scan_tree;
use crate::select::{diff_masks, latest_version_mask, subset_mask, SubsetPredicate};
use crate::table::DatasetTable;

/// Instruments queried by default; the archive truncates unrestricted
/// listings, so each is fetched separately.
pub const DEFAULT_INSTRUMENTS: [&str; 5] = ["EPD", "EUI", "MAG", "SWA", "RPW"];

/// Number of would-have-been-deleted filenames quoted when the failsafe
/// trips.
const FAILSAFE_SAMPLE: usize = 25;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub local_root: Utf8PathBuf,
    pub download_dir: Utf8PathBuf,
    pub instruments: Vec<String>,
    /// Abort when deletions exceed downloads by more than this.
    pub deletion_threshold: usize,
    /// When false, local files outside the subset are hidden from the diff
    /// and thereby preserved.
    pub delete_outside_subset: bool,
    /// Stop after the failsafe check and report the plan.
    pub dry_run: bool,
    pub download_parallelism: usize,
    pub order_downloads_by_size: bool,
    pub progress_style: ProgressStyle,
    pub tdn_fallback: TdnFallback,
}

impl SyncOptions {
    pub fn new(local_root: Utf8PathBuf, download_dir: Utf8PathBuf) -> Self {
        Self {
            local_root,
            download_dir,
            instruments: DEFAULT_INSTRUMENTS.iter().map(|s| s.to_string()).collect(),
            deletion_threshold: 25,
            delete_outside_subset: false,
            dry_run: false,
            download_parallelism: 1,
            order_downloads_by_size: false,
            progress_style: ProgressStyle::Long,
            tdn_fallback: TdnFallback::DescriptorTail,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncReport {
    pub downloads: usize,
    pub deletions: usize,
    pub relocated: usize,
    pub bytes: u64,
    pub dry_run: bool,
}

/// Brings the local tree into agreement with the archive's latest-version
/// datasets for the configured subset.
///
/// Phase order is the crash discipline: every download lands in the
/// download directory before any deletion, and every deletion happens
/// before any relocation into the local root. An abort between phases
/// leaves the tree recoverable by the next run.
pub fn sync<C: ArchiveClient>(
    options: &SyncOptions,
    client: &C,
    predicate: &SubsetPredicate,
    remover: &RemovalHandler,
) -> Result<SyncReport, MirrorError> {
    info!(root = %options.local_root, "scanning local tree");
    let local_dst = scan_tree(&options.local_root)?;
    info!(rows = local_dst.len(), "local tree scanned");

    let mut archive_dst = DatasetTable::new();
    for instrument in &options.instruments {
        info!(instrument, "fetching archive listing");
        let value = client.listing(instrument)?;
        archive_dst.append(listing_to_table(&value)?);
    }
    if archive_dst.is_empty() {
        return Err(MirrorError::EmptyArchiveListing);
    }
    info!(rows = archive_dst.len(), "archive listing merged");

    let subset = subset_mask(&archive_dst, predicate);
    let subset_dst = archive_dst.filter(&subset);
    let latest = latest_version_mask(&subset_dst)?;
    let reference_dst = subset_dst.filter(&latest);
    if reference_dst.is_empty() {
        // A mis-specified predicate must not wipe out the local mirror.
        return Err(MirrorError::EmptyReferenceSubset);
    }
    info!(rows = reference_dst.len(), "reference subset selected");

    let local_view = if options.delete_outside_subset {
        local_dst
    } else {
        let mask = subset_mask(&local_dst, predicate);
        local_dst.filter(&mask)
    };

    let (to_download, to_delete) = diff_masks(&reference_dst, &local_view);
    let downloads = to_download.iter().filter(|flag| **flag).count();
    let deletions = to_delete.iter().filter(|flag| **flag).count();
    info!(downloads, deletions, "diff computed");

    if deletions as i64 - downloads as i64 > options.deletion_threshold as i64 {
        let sample = local_view
            .filter(&to_delete)
            .file_names()
            .iter()
            .take(FAILSAFE_SAMPLE)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        return Err(MirrorError::DeletionThresholdExceeded {
            deletions,
            downloads,
            threshold: options.deletion_threshold,
            sample,
        });
    }

    if options.dry_run {
        info!(downloads, deletions, "dry run; stopping before any mutation");
        return Ok(SyncReport {
            downloads,
            deletions,
            dry_run: true,
            ..SyncReport::default()
        });
    }

    // Phase: download.
    fs::create_dir_all(options.download_dir.as_std_path())
        .map_err(|err| MirrorError::Filesystem(format!("create {}: {err}", options.download_dir)))?;
    let planned = reference_dst.filter(&to_download);
    let jobs: Vec<DownloadJob> = planned
        .records()
        .map(|record| DownloadJob {
            item_id: record.item_id,
            expected_size: record.file_size,
            expected_name: Some(record.file_name),
        })
        .collect();
    let downloader = BatchDownloader::new(client, options.download_dir.clone())
        .style(options.progress_style)
        .order_by_size(options.order_downloads_by_size)
        .parallelism(options.download_parallelism);
    let outcome = downloader.run(&jobs)?;
    info!(
        files = outcome.downloaded,
        bytes = outcome.bytes,
        "download phase complete"
    );

    // Phase: delete.
    let doomed: Vec<Utf8PathBuf> = local_view
        .filter(&to_delete)
        .file_paths()
        .iter()
        .filter_map(|path| path.clone())
        .collect();
    remover.remove(&doomed)?;
    info!(files = doomed.len(), "deletion phase complete");

    // Phase: relocate.
    let relocate_options = RelocateOptions {
        fallback: options.tdn_fallback,
        ..RelocateOptions::default()
    };
    let relocated = relocate_tree(
        &options.download_dir,
        &options.local_root,
        RelocateMode::Move,
        &relocate_options,
    )?;
    info!(files = relocated, "relocation phase complete");

    Ok(SyncReport {
        downloads: outcome.downloaded,
        deletions: doomed.len(),
        relocated,
        bytes: outcome.bytes,
        dry_run: false,
    })
}
