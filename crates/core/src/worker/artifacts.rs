//! Locating worker outputs on disk.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Extensions of the structured result artifact: the tracker's native
/// pickle, or JSON.
pub const RESULT_EXTENSIONS: &[&str] = &["pkl", "pickle", "json"];

/// JSON results only; used when a pickle turns out unreadable.
pub const JSON_EXTENSIONS: &[&str] = &["json"];

/// Extensions of the worker's rendered overlay video.
pub const RENDERED_VIDEO_EXTENSIONS: &[&str] = &["mp4"];

/// The most recently modified file under `dir` (recursively) whose
/// extension matches one of `exts` case-insensitively.
///
/// Returns `Ok(None)` if `dir` does not exist or holds no match.
pub async fn newest_file_with_extensions(
    dir: &Path,
    exts: &[&str],
) -> std::io::Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| exts.iter().any(|ext| e.eq_ignore_ascii_case(ext)));
            if !file_type.is_file() || !matches {
                continue;
            }

            let modified = entry.metadata().await?.modified()?;
            let is_newer = match &newest {
                None => true,
                Some((best, best_path)) => (modified, &path) > (*best, best_path),
            };
            if is_newer {
                newest = Some((modified, path));
            }
        }
    }

    Ok(newest.map(|(_, path)| path))
}
