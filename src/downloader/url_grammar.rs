//! Recognisers for well-known video page URLs.

use std::sync::LazyLock;

use regex::Regex;

static YOUTUBE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.|music\.)?(?:youtube\.com/(?:watch\?(?:.*&)?v=|shorts/|embed/|live/)|youtu\.be/)([A-Za-z0-9_-]{11})(?:[?&#/].*)?$",
    )
    .expect("valid YouTube URL regex")
});

/// Extract the 11-character video id from a YouTube watch, short, embed,
/// live or `youtu.be` URL.
pub fn youtube_video_id(url: &str) -> Option<&str> {
    YOUTUBE
        .captures(url.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn is_youtube_url(url: &str) -> bool {
    youtube_video_id(url).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_common_forms() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "youtube.com/live/dQw4w9WgXcQ",
        ] {
            assert_eq!(youtube_video_id(url), Some("dQw4w9WgXcQ"), "{url}");
        }
    }

    #[test]
    fn rejects_other_urls() {
        assert!(!is_youtube_url("https://example.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_youtube_url("https://www.youtube.com/watch?v=short"));
        assert!(!is_youtube_url("https://www.youtube.com/channel/UC123"));
        assert!(!is_youtube_url(""));
    }
}
