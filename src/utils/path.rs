//! Input discovery and output naming

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::domain::model::MediaSource;
use crate::error::{CompressXError, CompressXResult};

/// Extensions picked up when walking a directory
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "3gp", "mkv", "webm", "avi", "ts"];

/// Appended to the input stem to name outputs
pub const OUTPUT_SUFFIX: &str = "_compressed";

pub struct PathUtils;

impl PathUtils {
    pub fn is_video_file(path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// True for files this tool wrote itself
    pub fn is_compressed_output(path: &Path) -> bool {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().ends_with(OUTPUT_SUFFIX))
            .unwrap_or(false)
    }

    /// `<stem>_compressed.mp4` for a source
    pub fn output_file_name(source: &MediaSource) -> String {
        let stem = source
            .file_name()
            .and_then(|name| {
                Path::new(&name)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "video".to_string());
        format!("{}{}.mp4", stem, OUTPUT_SUFFIX)
    }

    /// `name`, or `name` with a numeric suffix when `dir` already holds it
    /// or another job of the same run reserved it
    pub fn unique_file_name(dir: &Path, name: &str, reserved: &HashSet<PathBuf>) -> String {
        let taken = |candidate: &str| {
            let path = dir.join(candidate);
            path.exists() || reserved.contains(&path)
        };
        if !taken(name) {
            return name.to_string();
        }
        let path = Path::new(name);
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        (1..)
            .map(|n| format!("{}_{}{}", stem, n, extension))
            .find(|candidate| !taken(candidate.as_str()))
            .unwrap_or_else(|| name.to_string())
    }

    /// Video files under `root`, sorted by path. A file root is returned as is.
    ///
    /// Outputs of earlier runs are skipped so a directory can be compressed in place.
    pub fn collect_inputs(root: &Path, recursive: bool) -> CompressXResult<Vec<PathBuf>> {
        if !root.exists() {
            return Err(CompressXError::SourceNotFound {
                message: format!("{} does not exist", root.display()),
            });
        }
        if root.is_file() {
            return Ok(vec![root.to_path_buf()]);
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut inputs = Vec::new();
        for entry in WalkDir::new(root).max_depth(max_depth).sort_by_file_name() {
            let entry = entry.map_err(|e| CompressXError::IoError(e.into()))?;
            let path = entry.path();
            if entry.file_type().is_file()
                && Self::is_video_file(path)
                && !Self::is_compressed_output(path)
            {
                inputs.push(path.to_path_buf());
            }
        }
        debug!("found {} inputs under {}", inputs.len(), root.display());
        Ok(inputs)
    }
}
