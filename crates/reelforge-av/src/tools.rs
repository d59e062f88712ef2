//! External tool detection and management.
//!
//! The [`ToolRegistry`] discovers and caches the locations of the transcoder
//! (ffmpeg) and prober (ffprobe) and provides lookup methods for the rest of
//! the crate.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use reelforge_core::config::Settings;
use reelforge_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// The external tools reelforge drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// ffmpeg.
    Transcoder,
    /// ffprobe.
    Prober,
}

impl Tool {
    pub const ALL: [Tool; 2] = [Tool::Transcoder, Tool::Prober];

    /// Executable name looked up on `PATH`.
    pub fn binary_name(self) -> &'static str {
        match self {
            Tool::Transcoder => "ffmpeg",
            Tool::Prober => "ffprobe",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// Optional explicit locations for the tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPaths {
    pub transcoder: Option<PathBuf>,
    pub prober: Option<PathBuf>,
}

impl ToolPaths {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            transcoder: settings.transcoder_path.clone(),
            prober: settings.prober_path.clone(),
        }
    }

    fn configured(&self, tool: Tool) -> Option<PathBuf> {
        match tool {
            Tool::Transcoder => self.transcoder.clone(),
            Tool::Prober => self.prober.clone().or_else(|| {
                // ffprobe ships next to ffmpeg.
                self.transcoder
                    .as_deref()
                    .and_then(|t| sibling(t, Tool::Prober.binary_name()))
            }),
        }
    }
}

/// Path of `name` in the same directory as `path`, keeping its extension
/// (so `ffmpeg.exe` maps to `ffprobe.exe`).
fn sibling(path: &Path, name: &str) -> Option<PathBuf> {
    let dir = path.parent()?;
    let file = match path.extension() {
        Some(ext) => format!("{name}.{}", ext.to_string_lossy()),
        None => name.to_string(),
    };
    Some(dir.join(file))
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `-version` output, if available.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool locations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<Tool, PathBuf>,
}

impl ToolRegistry {
    /// Discover tools by searching `PATH` (or using configured overrides).
    ///
    /// A configured path is used when it exists; otherwise [`which::which`]
    /// locates the tool. Tools that are not found are omitted.
    pub fn discover(paths: &ToolPaths) -> Self {
        let mut tools = HashMap::new();

        for tool in Tool::ALL {
            let resolved = match paths.configured(tool) {
                Some(p) if p.exists() => Some(p),
                Some(p) => {
                    tracing::warn!(
                        tool = %tool,
                        path = %p.display(),
                        "configured path does not exist; searching PATH"
                    );
                    which::which(tool.binary_name()).ok()
                }
                None => which::which(tool.binary_name()).ok(),
            };

            match resolved {
                Some(path) => {
                    tracing::debug!(tool = %tool, path = %path.display(), "tool found");
                    tools.insert(tool, path);
                }
                None => tracing::debug!(tool = %tool, "tool not found"),
            }
        }

        Self { tools }
    }

    /// Use exactly the given paths, without consulting `PATH`.
    pub fn from_paths(paths: &ToolPaths) -> Self {
        let tools = Tool::ALL
            .into_iter()
            .filter_map(|tool| paths.configured(tool).map(|p| (tool, p)))
            .collect();
        Self { tools }
    }

    /// Path to `tool`, or an error if it was not found during discovery.
    ///
    /// A missing transcoder is reported as [`Error::TranscoderNotFound`].
    pub fn require(&self, tool: Tool) -> Result<&Path> {
        match self.tools.get(&tool) {
            Some(p) => Ok(p.as_path()),
            None if tool == Tool::Transcoder => Err(Error::TranscoderNotFound),
            None => Err(Error::tool(
                tool.binary_name(),
                format!("{tool} not found; is it installed and in PATH?"),
            )),
        }
    }

    pub fn is_available(&self, tool: Tool) -> bool {
        self.tools.contains_key(&tool)
    }

    /// Check every tool and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        Tool::ALL
            .iter()
            .map(|&tool| match self.tools.get(&tool) {
                Some(path) => ToolInfo {
                    name: tool.binary_name().to_string(),
                    available: true,
                    version: detect_version(path),
                    path: Some(path.clone()),
                },
                None => ToolInfo {
                    name: tool.binary_name().to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
