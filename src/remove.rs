use std::fs;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::error::MirrorError;

/// How doomed files leave the mirror.
#[derive(Debug, Clone)]
pub enum RemovalMode {
    /// Hand the paths straight to the external remove command.
    Direct,
    /// Move the paths into a staging directory first, flattened to their
    /// basenames, so deletions stay auditable and undoable. The staging
    /// directory is then optionally removed wholesale.
    Staged {
        staging_dir: Utf8PathBuf,
        remove_staging: bool,
    },
}

pub struct RemovalHandler {
    command: String,
    mode: RemovalMode,
}

impl RemovalHandler {
    pub fn new(command: impl Into<String>, mode: RemovalMode) -> Self {
        Self {
            command: command.into(),
            mode,
        }
    }

    pub fn remove(&self, paths: &[Utf8PathBuf]) -> Result<(), MirrorError> {
        if paths.is_empty() {
            return Ok(());
        }
        match &self.mode {
            RemovalMode::Direct => self.run_command(paths.iter().map(|path| path.as_str())),
            RemovalMode::Staged {
                staging_dir,
                remove_staging,
            } => {
                fs::create_dir_all(staging_dir.as_std_path())
                    .map_err(|err| MirrorError::Filesystem(format!("create {staging_dir}: {err}")))?;
                for path in paths {
                    let name = path.file_name().ok_or_else(|| {
                        MirrorError::Filesystem(format!("path without file name: {path}"))
                    })?;
                    stage(path, &staging_dir.join(name))?;
                }
                info!(count = paths.len(), dir = %staging_dir, "staged files for removal");
                if *remove_staging {
                    self.run_command([staging_dir.as_str()])?;
                }
                Ok(())
            }
        }
    }

    fn run_command<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), MirrorError> {
        let status = Command::new(&self.command)
            .args(paths)
            .status()
            .map_err(|err| MirrorError::RemoveCommand(format!("{}: {err}", self.command)))?;
        if !status.success() {
            return Err(MirrorError::RemoveCommand(format!(
                "{} exited with {status}",
                self.command
            )));
        }
        Ok(())
    }
}

fn stage(from: &Utf8Path, to: &Utf8Path) -> Result<(), MirrorError> {
    if fs::rename(from.as_std_path(), to.as_std_path()).is_ok() {
        return Ok(());
    }
    fs::copy(from.as_std_path(), to.as_std_path())
        .map_err(|err| MirrorError::Filesystem(format!("stage {from} -> {to}: {err}")))?;
    fs::remove_file(from.as_std_path())
        .map_err(|err| MirrorError::Filesystem(format!("remove {from}: {err}")))
}
