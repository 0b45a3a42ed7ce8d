use std::fs;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::domain::DatasetFilename;
use crate::error::MirrorError;
use crate::placement::{placement_path, TdnFallback};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocateMode {
    /// Rename-or-replace; falls back to copy-and-remove across devices.
    Move,
    Copy,
}

/// How file contents are copied.
///
/// `Command` shells out to a platform copy utility; kept as an escape hatch
/// for network file systems where in-process copies have been seen to fail
/// intermittently.
#[derive(Debug, Clone)]
pub enum CopyBackend {
    Native,
    Command(String),
}

#[derive(Debug, Clone)]
pub struct RelocateOptions {
    pub fallback: TdnFallback,
    /// Permission bits for created directories (unix only).
    pub dir_mode: u32,
    pub copy_backend: CopyBackend,
}

impl Default for RelocateOptions {
    fn default() -> Self {
        Self {
            fallback: TdnFallback::DescriptorTail,
            dir_mode: 0o755,
            copy_backend: CopyBackend::Native,
        }
    }
}

/// Moves or copies every recognized file under `source` to its placement
/// path under `dest_root`, creating directories as needed.
///
/// Unrecognized filenames are logged and skipped. A file already at its
/// destination is a no-op. Returns the number of files relocated.
pub fn relocate_tree(
    source: &Utf8Path,
    dest_root: &Utf8Path,
    mode: RelocateMode,
    options: &RelocateOptions,
) -> Result<usize, MirrorError> {
    let mut files = Vec::new();
    let mut stack = vec![source.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("read {dir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| MirrorError::Filesystem(err.to_string()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|path| MirrorError::Filesystem(format!("non-utf8 path {path:?}")))?;
            let metadata = fs::metadata(path.as_std_path())
                .map_err(|err| MirrorError::Filesystem(format!("stat {path}: {err}")))?;
            if metadata.is_dir() {
                stack.push(path);
            } else if metadata.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();

    let mut relocated = 0usize;
    for path in files {
        let Some(name) = path.file_name() else {
            continue;
        };
        let Some(parsed) = DatasetFilename::parse(name) else {
            warn!(%path, "skipping unrecognized file during relocation");
            continue;
        };
        let relative = placement_path(&parsed, options.fallback)?;
        let dest_dir = dest_root.join(relative);
        create_dir_all_with_mode(&dest_dir, options.dir_mode)?;
        let dest = dest_dir.join(name);
        if dest == path {
            debug!(%path, "already in place");
            continue;
        }
        match mode {
            RelocateMode::Move => move_file(&path, &dest)?,
            RelocateMode::Copy => copy_file(&path, &dest, &options.copy_backend)?,
        }
        info!(from = %path, to = %dest, "relocated");
        relocated += 1;
    }
    Ok(relocated)
}

fn create_dir_all_with_mode(dir: &Utf8Path, mode: u32) -> Result<(), MirrorError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder
        .create(dir.as_std_path())
        .map_err(|err| MirrorError::Filesystem(format!("create {dir}: {err}")))
}

fn move_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), MirrorError> {
    if fs::rename(from.as_std_path(), to.as_std_path()).is_ok() {
        return Ok(());
    }
    // Cross-device rename fails; copy then remove the original.
    fs::copy(from.as_std_path(), to.as_std_path())
        .map_err(|err| MirrorError::Filesystem(format!("copy {from} -> {to}: {err}")))?;
    fs::remove_file(from.as_std_path())
        .map_err(|err| MirrorError::Filesystem(format!("remove {from}: {err}")))
}

fn copy_file(from: &Utf8Path, to: &Utf8Path, backend: &CopyBackend) -> Result<(), MirrorError> {
    match backend {
        CopyBackend::Native => {
            fs::copy(from.as_std_path(), to.as_std_path())
                .map_err(|err| MirrorError::Filesystem(format!("copy {from} -> {to}: {err}")))?;
            Ok(())
        }
        CopyBackend::Command(program) => {
            let status = Command::new(program)
                .arg(from.as_str())
                .arg(to.as_str())
                .status()
                .map_err(|err| MirrorError::Filesystem(format!("spawn {program}: {err}")))?;
            if !status.success() {
                return Err(MirrorError::Filesystem(format!(
                    "{program} {from} {to} exited with {status}"
                )));
            }
            Ok(())
        }
    }
}
