//! Settings file discovery and loading.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub use reelforge_core::config::{
    AudioQuality, Settings, SettingsProvider, SettingsStore, VideoQuality,
};

/// Default locations, searched in order when no explicit path is given.
const DEFAULT_PATHS: &[&str] = &["./reelforge.json", "~/.config/reelforge/settings.json"];

/// Resolve the settings file: the explicit path, or the first default
/// location that exists.
pub fn locate_config(custom_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = custom_path {
        return Some(path.to_path_buf());
    }
    DEFAULT_PATHS
        .iter()
        .map(|p| expand(Path::new(p)))
        .find(|p| p.exists())
}

/// Load settings from a JSON file. Unlike [`Settings::load_or_default`],
/// a missing or malformed file is an error.
pub fn load_config(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut settings = Settings::from_json(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    expand_paths(&mut settings);

    for warning in settings.validate() {
        tracing::warn!(path = %path.display(), "{warning}");
    }
    Ok(settings)
}

/// Load the explicit config (strictly), else the first default location
/// (leniently), else defaults.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Settings> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let mut settings = match locate_config(None) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Using settings file");
            Settings::load_or_default(Some(&path))
        }
        None => Settings::default(),
    };
    expand_paths(&mut settings);
    Ok(settings)
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Expand `~` in every path-valued setting.
fn expand_paths(settings: &mut Settings) {
    settings.download_dir = expand(&settings.download_dir);
    for path in [
        &mut settings.temp_dir,
        &mut settings.transcoder_path,
        &mut settings.prober_path,
    ]
    .into_iter()
    .flatten()
    {
        *path = expand(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn explicit_path_wins() {
        let p = Path::new("/somewhere/else.json");
        assert_eq!(locate_config(Some(p)), Some(p.to_path_buf()));
    }

    #[test]
    fn load_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_concurrent_downloads": 3, "default_audio_quality": "medium", "download_dir": "/data/dl"}}"#
        )
        .unwrap();

        let settings = load_config(file.path()).unwrap();
        assert_eq!(settings.max_concurrent_downloads, 3);
        assert_eq!(settings.default_audio_quality, AudioQuality::Medium);
        assert_eq!(settings.download_dir, PathBuf::from("/data/dl"));
        assert_eq!(settings.default_video_quality, VideoQuality::P720);
    }

    #[test]
    fn explicit_missing_or_malformed_file_is_error() {
        assert!(load_config_or_default(Some(Path::new("/no/such/reelforge.json"))).is_err());

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn tilde_is_expanded() {
        let mut settings = Settings {
            download_dir: PathBuf::from("~/Downloads"),
            temp_dir: Some(PathBuf::from("~/tmp")),
            ..Settings::default()
        };
        expand_paths(&mut settings);
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(settings.download_dir, PathBuf::from(&home).join("Downloads"));
            assert_eq!(settings.temp_dir, Some(PathBuf::from(home).join("tmp")));
        }
    }
}
