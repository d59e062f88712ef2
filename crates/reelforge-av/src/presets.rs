//! Static catalogue of conversion presets.

use std::collections::HashMap;
use std::sync::LazyLock;

use reelforge_core::{ConversionPreset, Error, PresetCategory, Result};

use reelforge_core::PresetCategory::{Audio, Compress, Social, Video};

static PRESETS: &[ConversionPreset] = &[
    // -- Audio ---------------------------------------------------------------
    ConversionPreset {
        id: "mp3-320",
        name: "MP3 320 kbps",
        description: "High quality MP3 audio",
        category: Audio,
        output_ext: "mp3",
        transcoder_args: &["-vn", "-c:a", "libmp3lame", "-b:a", "320k"],
    },
    ConversionPreset {
        id: "mp3-192",
        name: "MP3 192 kbps",
        description: "Standard quality MP3 audio",
        category: Audio,
        output_ext: "mp3",
        transcoder_args: &["-vn", "-c:a", "libmp3lame", "-b:a", "192k"],
    },
    ConversionPreset {
        id: "aac-256",
        name: "AAC 256 kbps",
        description: "AAC audio in an M4A container",
        category: Audio,
        output_ext: "m4a",
        transcoder_args: &["-vn", "-c:a", "aac", "-b:a", "256k"],
    },
    ConversionPreset {
        id: "flac",
        name: "FLAC",
        description: "Lossless compressed audio",
        category: Audio,
        output_ext: "flac",
        transcoder_args: &["-vn", "-c:a", "flac"],
    },
    ConversionPreset {
        id: "wav",
        name: "WAV",
        description: "Uncompressed 16-bit PCM audio",
        category: Audio,
        output_ext: "wav",
        transcoder_args: &["-vn", "-c:a", "pcm_s16le"],
    },
    ConversionPreset {
        id: "opus-160",
        name: "Opus 160 kbps",
        description: "Efficient Opus audio",
        category: Audio,
        output_ext: "opus",
        transcoder_args: &["-vn", "-c:a", "libopus", "-b:a", "160k"],
    },
    // -- Video ---------------------------------------------------------------
    ConversionPreset {
        id: "mp4-h264",
        name: "MP4 (H.264)",
        description: "Widely compatible H.264/AAC video",
        category: Video,
        output_ext: "mp4",
        transcoder_args: &[
            "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "aac", "-b:a", "192k",
            "-movflags", "+faststart",
        ],
    },
    ConversionPreset {
        id: "mp4-h265",
        name: "MP4 (H.265)",
        description: "Smaller files with HEVC video",
        category: Video,
        output_ext: "mp4",
        transcoder_args: &[
            "-c:v", "libx265", "-preset", "medium", "-crf", "28", "-tag:v", "hvc1", "-c:a", "aac",
            "-b:a", "192k", "-movflags", "+faststart",
        ],
    },
    ConversionPreset {
        id: "webm-vp9",
        name: "WebM (VP9)",
        description: "VP9 video with Opus audio for the web",
        category: Video,
        output_ext: "webm",
        transcoder_args: &[
            "-c:v", "libvpx-vp9", "-crf", "31", "-b:v", "0", "-c:a", "libopus", "-b:a", "128k",
        ],
    },
    ConversionPreset {
        id: "mkv-copy",
        name: "MKV (remux)",
        description: "Copy all streams into Matroska without re-encoding",
        category: Video,
        output_ext: "mkv",
        transcoder_args: &["-map", "0", "-c", "copy"],
    },
    // -- Compress ------------------------------------------------------------
    ConversionPreset {
        id: "compress-medium",
        name: "Compress (medium)",
        description: "Noticeably smaller with little visible loss",
        category: Compress,
        output_ext: "mp4",
        transcoder_args: &[
            "-c:v", "libx264", "-preset", "slow", "-crf", "28", "-c:a", "aac", "-b:a", "128k",
            "-movflags", "+faststart",
        ],
    },
    ConversionPreset {
        id: "compress-small",
        name: "Compress (small)",
        description: "Much smaller, downscaled to at most 720p",
        category: Compress,
        output_ext: "mp4",
        transcoder_args: &[
            "-c:v", "libx264", "-preset", "slow", "-crf", "32", "-vf", "scale=-2:'min(720,ih)'",
            "-c:a", "aac", "-b:a", "96k", "-movflags", "+faststart",
        ],
    },
    // -- Social --------------------------------------------------------------
    ConversionPreset {
        id: "social-720p",
        name: "Social 720p",
        description: "720p H.264 suited to social media uploads",
        category: Social,
        output_ext: "mp4",
        transcoder_args: &[
            "-c:v", "libx264", "-preset", "fast", "-crf", "23", "-vf", "scale=-2:720",
            "-r", "30", "-c:a", "aac", "-b:a", "128k", "-movflags", "+faststart",
        ],
    },
    ConversionPreset {
        id: "gif",
        name: "Animated GIF",
        description: "Looping 480px wide GIF at 12 fps",
        category: Social,
        output_ext: "gif",
        transcoder_args: &[
            "-vf",
            "fps=12,scale=480:-1:flags=lanczos,split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse",
            "-loop", "0", "-an",
        ],
    },
];

static BY_ID: LazyLock<HashMap<&'static str, &'static ConversionPreset>> =
    LazyLock::new(|| PRESETS.iter().map(|p| (p.id, p)).collect());

/// Every preset, in catalogue order.
pub fn all() -> &'static [ConversionPreset] {
    PRESETS
}

/// Presets in `category`, in catalogue order.
pub fn by_category(category: PresetCategory) -> Vec<&'static ConversionPreset> {
    PRESETS.iter().filter(|p| p.category == category).collect()
}

/// Look up a preset by id.
pub fn get(id: &str) -> Result<&'static ConversionPreset> {
    BY_ID
        .get(id)
        .copied()
        .ok_or_else(|| Error::not_found("preset", id))
}
