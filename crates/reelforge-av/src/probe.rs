//! ffprobe-based media analysis.

use std::path::Path;
use std::time::Duration;

use reelforge_core::{AudioStreamInfo, Error, MediaInfo, Result, VideoStreamInfo};
use serde::Deserialize;

use crate::command::ToolCommand;
use crate::tools::{Tool, ToolRegistry};

/// Time allowed for a single probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    format_name: String,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    bit_rate: Option<String>,
}

/// Probe `path` with ffprobe and summarise the result.
///
/// # Errors
///
/// - [`Error::NotFound`] if `path` does not exist.
/// - [`Error::Tool`] if ffprobe is missing, fails, or times out.
/// - [`Error::Probe`] if its output cannot be parsed.
pub async fn analyze(tools: &ToolRegistry, path: &Path) -> Result<MediaInfo> {
    if !path.exists() {
        return Err(Error::not_found("file", path.display()));
    }
    let prober = tools.require(Tool::Prober)?;

    let output = ToolCommand::new(prober.to_path_buf())
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path.to_string_lossy())
        .timeout(PROBE_TIMEOUT)
        .execute()
        .await?;

    let info = parse_ffprobe_json(&output.stdout_str())?;
    tracing::debug!(
        path = %path.display(),
        duration = info.duration_seconds,
        container = %info.container_format,
        "probed"
    );
    Ok(info)
}

/// Parse ffprobe's `-print_format json -show_format -show_streams` output.
///
/// Numeric fields arrive as strings; unparsable values become zero. Only the
/// first video and first audio stream are kept.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaInfo> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("invalid ffprobe output: {e}")))?;
    Ok(summarize(output))
}

fn summarize(output: FfprobeOutput) -> MediaInfo {
    let mut info = match output.format {
        Some(format) => MediaInfo {
            duration_seconds: parse_or_zero(format.duration.as_deref()),
            container_format: format.format_name,
            size_bytes: parse_or_zero(format.size.as_deref()),
            bitrate: parse_or_zero(format.bit_rate.as_deref()),
            video_stream: None,
            audio_stream: None,
        },
        None => MediaInfo::default(),
    };

    for stream in output.streams {
        match stream.codec_type.as_str() {
            "video" if info.video_stream.is_none() => {
                let rate = stream
                    .avg_frame_rate
                    .as_deref()
                    .map(parse_frame_rate)
                    .filter(|fps| *fps > 0.0)
                    .unwrap_or_else(|| parse_frame_rate(stream.r_frame_rate.as_deref().unwrap_or("")));
                info.video_stream = Some(VideoStreamInfo {
                    codec: stream.codec_name.unwrap_or_default(),
                    width: stream.width.unwrap_or(0),
                    height: stream.height.unwrap_or(0),
                    fps: rate,
                    bitrate: parse_or_zero(stream.bit_rate.as_deref()),
                });
            }
            "audio" if info.audio_stream.is_none() => {
                info.audio_stream = Some(AudioStreamInfo {
                    codec: stream.codec_name.unwrap_or_default(),
                    channels: stream.channels.unwrap_or(0),
                    sample_rate: parse_or_zero(stream.sample_rate.as_deref()),
                    bitrate: parse_or_zero(stream.bit_rate.as_deref()),
                });
            }
            _ => {}
        }
    }

    info
}

fn parse_or_zero<T: std::str::FromStr + Default>(s: Option<&str>) -> T {
    s.and_then(|s| s.trim().parse().ok()).unwrap_or_default()
}

/// Parse a `"num/den"` frame rate. Anything malformed, including a zero
/// denominator, yields `0.0`.
///
/// # Examples
///
/// ```
/// use reelforge_av::probe::parse_frame_rate;
///
/// assert_eq!(parse_frame_rate("30/1"), 30.0);
/// assert_eq!(parse_frame_rate("30/0"), 0.0);
/// ```
pub fn parse_frame_rate(rate: &str) -> f64 {
    let Some((num, den)) = rate.split_once('/') else {
        return 0.0;
    };
    let (Ok(num), Ok(den)) = (num.trim().parse::<f64>(), den.trim().parse::<f64>()) else {
        return 0.0;
    };
    if den == 0.0 || !num.is_finite() || !den.is_finite() {
        return 0.0;
    }
    num / den
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "h264",
                "codec_type": "video",
                "width": 1920,
                "height": 1080,
                "r_frame_rate": "24000/1001",
                "avg_frame_rate": "24000/1001",
                "bit_rate": "4500000"
            },
            {
                "index": 1,
                "codec_name": "aac",
                "codec_type": "audio",
                "sample_rate": "48000",
                "channels": 2,
                "bit_rate": "128000"
            },
            {
                "index": 2,
                "codec_name": "opus",
                "codec_type": "audio",
                "sample_rate": "48000",
                "channels": 6
            }
        ],
        "format": {
            "filename": "movie.mp4",
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "5400.123000",
            "size": "1500000000",
            "bit_rate": "2222222"
        }
    }"#;

    #[test]
    fn frame_rate_parsing() {
        assert_eq!(parse_frame_rate("30/1"), 30.0);
        assert!((parse_frame_rate("24000/1001") - 23.976).abs() < 0.001);
        assert_eq!(parse_frame_rate("30/0"), 0.0);
        assert_eq!(parse_frame_rate("abc/def"), 0.0);
        assert_eq!(parse_frame_rate(""), 0.0);
        assert_eq!(parse_frame_rate("25"), 0.0);
        assert_eq!(parse_frame_rate("0/0"), 0.0);
    }

    #[test]
    fn parses_format_and_first_streams() {
        let info = parse_ffprobe_json(SAMPLE).unwrap();
        assert!((info.duration_seconds - 5400.123).abs() < 1e-6);
        assert_eq!(info.container_format, "mov,mp4,m4a,3gp,3g2,mj2");
        assert_eq!(info.size_bytes, 1_500_000_000);
        assert_eq!(info.bitrate, 2_222_222);

        let video = info.video_stream.unwrap();
        assert_eq!(video.codec, "h264");
        assert_eq!((video.width, video.height), (1920, 1080));
        assert_eq!(video.bitrate, 4_500_000);

        let audio = info.audio_stream.unwrap();
        assert_eq!(audio.codec, "aac");
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.sample_rate, 48_000);
    }

    #[test]
    fn unparsable_numbers_become_zero() {
        let json = r#"{
            "format": {"format_name": "mp3", "duration": "N/A", "size": "", "bit_rate": "x"},
            "streams": [{"codec_type": "audio", "codec_name": "mp3", "sample_rate": "?"}]
        }"#;
        let info = parse_ffprobe_json(json).unwrap();
        assert_eq!(info.duration_seconds, 0.0);
        assert_eq!(info.size_bytes, 0);
        assert_eq!(info.bitrate, 0);
        assert!(info.video_stream.is_none());
        assert_eq!(info.audio_stream.unwrap().sample_rate, 0);
    }

    #[test]
    fn garbage_is_a_probe_error() {
        assert!(matches!(parse_ffprobe_json("not json"), Err(Error::Probe(_))));
    }

    #[test]
    fn falls_back_to_r_frame_rate() {
        let json = r#"{"streams": [{"codec_type": "video", "avg_frame_rate": "0/0", "r_frame_rate": "25/1"}]}"#;
        let info = parse_ffprobe_json(json).unwrap();
        assert_eq!(info.video_stream.unwrap().fps, 25.0);
    }

    #[tokio::test]
    async fn missing_input_is_not_found() {
        let err = analyze(&ToolRegistry::default(), Path::new("/no/such/file.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
