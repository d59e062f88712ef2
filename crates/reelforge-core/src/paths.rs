//! Filesystem helpers used by the downloader.
//!
//! Covers filename sanitising, directory preparation, writability checks,
//! cross-filesystem moves, race-free name reservation, and [`PartialFile`], a guard that removes an
//! in-flight file unless it is explicitly kept.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Audio-only container extensions.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "opus", "ogg", "oga", "flac", "wav"];

/// Container extensions that normally carry video.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi", "m4v", "ts", "flv"];

/// Longest base name produced by [`sanitize_filename`], in UTF-8 bytes.
///
/// Leaves room under the usual 255-byte limit for an id prefix, a ` (n)`
/// counter and an extension.
const MAX_FILENAME_BYTES: usize = 200;

/// Check if an extension names an audio-only container.
///
/// # Examples
///
/// ```
/// use reelforge_core::paths::is_audio_extension;
///
/// assert!(is_audio_extension("M4A"));
/// assert!(!is_audio_extension("webm"));
/// ```
pub fn is_audio_extension(ext: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

/// Every extension reelforge recognises as media.
#[must_use]
pub fn media_extensions() -> impl Iterator<Item = &'static str> {
    AUDIO_EXTENSIONS.iter().chain(VIDEO_EXTENSIONS).copied()
}

/// Lowercased extension of `path`, if any.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Turn an arbitrary title into a filesystem-safe base name.
///
/// Reserved and control characters become `_`, runs of whitespace collapse
/// to one space, leading/trailing dots and spaces are stripped, and the
/// result is capped at 200 bytes on a character boundary.
/// An empty result becomes `"download"`.
///
/// # Examples
///
/// ```
/// use reelforge_core::paths::sanitize_filename;
///
/// assert_eq!(sanitize_filename("AC/DC: Live?"), "AC_DC_ Live_");
/// assert_eq!(sanitize_filename("  ...  "), "download");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_space = false;

    for c in name.chars() {
        let c = match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        };
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }

    let trimmed = out.trim_matches(|c: char| c == '.' || c == ' ');
    let end = trimmed
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= MAX_FILENAME_BYTES)
        .last()
        .unwrap_or(0);
    let capped = trimmed[..end].trim_end_matches(|c: char| c == '.' || c == ' ');

    if capped.is_empty() {
        "download".to_string()
    } else {
        capped.to_string()
    }
}

/// Create `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// The scratch directory for in-flight files, created on demand.
pub fn temp_dir(configured: Option<&Path>) -> Result<PathBuf> {
    let dir = configured
        .map(Path::to_path_buf)
        .unwrap_or_else(|| std::env::temp_dir().join("reelforge"));
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Probe whether files can be created inside `dir`.
pub fn is_writable(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let probe = dir.join(format!(".reelforge-write-test-{}", std::process::id()));
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

/// Move a file, copying and deleting when a rename crosses filesystems.
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                "rename failed ({e}); falling back to copy"
            );
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await?;
            Ok(())
        }
    }
}

/// `path` itself, then `stem (1).ext`, `stem (2).ext`, ...
fn numbered_candidates(path: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    std::iter::once(path.to_path_buf()).chain((1..).map(move |n| {
        let name = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        parent.join(name)
    }))
}

/// Atomically claim a file name that nothing else holds.
///
/// Creates an empty placeholder at `path`, or at the first free ` (n)`
/// variant, with `create_new`, so two concurrent callers never receive the
/// same path. The caller owns the placeholder and is expected to replace it
/// (rename or overwrite) or remove it.
pub async fn reserve_unique(path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    for candidate in numbered_candidates(path) {
        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await;
        match created {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("numbered candidates are unbounded")
}

// ---------------------------------------------------------------------------
// PartialFile
// ---------------------------------------------------------------------------

/// Removes the file at `path` on drop unless [`PartialFile::keep`] was called.
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the guard and hand back the path.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed partial file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to remove partial file: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a<b>c:d\"e/f\\g|h?i*j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("tab\there"), "tab_here");
    }

    #[test]
    fn sanitize_collapses_whitespace_and_trims() {
        assert_eq!(sanitize_filename("  My   Song  "), "My Song");
        assert_eq!(sanitize_filename("..hidden.."), "hidden");
        assert_eq!(sanitize_filename(""), "download");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_filename(&long).len(), MAX_FILENAME_BYTES);
    }

    #[test]
    fn sanitize_caps_multibyte_titles_by_bytes() {
        let title = "日".repeat(150);
        let name = sanitize_filename(&title);
        assert_eq!(name.len(), 198);
        assert!(name.chars().all(|c| c == '日'));

        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join(format!("0f8e2a64-9c1d-4b7e-a3f5-1d2c3b4a5e6f_{name}.webm"));
        std::fs::File::create(&temp).unwrap();
    }

    #[test]
    fn extension_classification() {
        assert!(is_audio_extension("opus"));
        assert!(!is_audio_extension("webm"));
        assert_eq!(extension_of(Path::new("/a/b.MKV")).as_deref(), Some("mkv"));
        assert!(media_extensions().any(|e| e == "flac"));
    }

    #[test]
    fn writable_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_writable(dir.path()));
        assert!(!is_writable(&dir.path().join("missing")));
    }

    #[test]
    fn temp_dir_creates_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let got = temp_dir(Some(&scratch)).unwrap();
        assert_eq!(got, scratch);
        assert!(scratch.is_dir());
    }

    #[test]
    fn partial_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.bin");
        std::fs::write(&path, b"abc").unwrap();
        {
            let _guard = PartialFile::new(&path);
        }
        assert!(!path.exists());
    }

    #[test]
    fn partial_file_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.bin");
        std::fs::write(&path, b"abc").unwrap();
        let kept = PartialFile::new(&path).keep();
        assert_eq!(kept, path);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn reserve_unique_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, b"keep").unwrap();

        let first = reserve_unique(&path).await.unwrap();
        let second = reserve_unique(&path).await.unwrap();
        assert_eq!(first, dir.path().join("song (1).mp3"));
        assert_eq!(second, dir.path().join("song (2).mp3"));
        assert!(first.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"keep");
    }

    #[tokio::test]
    async fn concurrent_reservations_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");

        let claims = claim_concurrently(&path, 8).await;
        let mut unique = claims.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), claims.len());
        assert!(claims.contains(&path));
    }

    async fn claim_concurrently(path: &Path, n: usize) -> Vec<PathBuf> {
        let tasks: Vec<_> = (0..n)
            .map(|_| {
                let path = path.to_path_buf();
                tokio::spawn(async move { reserve_unique(&path).await.unwrap() })
            })
            .collect();
        let mut claims = Vec::with_capacity(n);
        for task in tasks {
            claims.push(task.await.unwrap());
        }
        claims
    }

    #[tokio::test]
    async fn move_file_renames() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.bin");
        let to = dir.path().join("nested/b.bin");
        std::fs::write(&from, b"data").unwrap();
        move_file(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"data");
    }
}
