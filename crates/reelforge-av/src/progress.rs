//! Parser for ffmpeg `-progress` output.
//!
//! With `-progress pipe:1` ffmpeg writes blocks of `key=value` lines to
//! stdout, each block terminated by `progress=continue` (or
//! `progress=end` for the last one). [`ProgressParser`] consumes those lines
//! one at a time and yields a [`ProgressSnapshot`] at every block boundary.

/// Progress at one block boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub current_time_seconds: f64,
    /// Realtime speed multiplier, `0.0` until ffmpeg reports one.
    pub speed: f64,
    /// Percent in `[0, 100]`, never lower than a previous snapshot.
    pub percent: f64,
    /// This was the final `progress=end` block.
    pub finished: bool,
}

/// Stateful line consumer for one transcode.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration_seconds: f64,
    current_time_seconds: f64,
    speed: f64,
    percent: f64,
}

impl ProgressParser {
    /// `duration_seconds` is the length of the output being produced; a
    /// non-positive value leaves percent at zero until the end block, which
    /// always reports 100.
    pub fn new(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            current_time_seconds: 0.0,
            speed: 0.0,
            percent: 0.0,
        }
    }

    /// Feed one line. Returns a snapshot on `progress=` lines.
    ///
    /// Unknown keys, blank lines and anything that isn't `key=value` are
    /// ignored so interleaved diagnostics don't disturb parsing.
    pub fn feed(&mut self, line: &str) -> Option<ProgressSnapshot> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key.trim() {
            // out_time_ms is microseconds too (a long-standing ffmpeg quirk).
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    if us >= 0 {
                        self.current_time_seconds = us as f64 / 1_000_000.0;
                    }
                }
                None
            }
            "speed" => {
                if let Some(speed) = parse_speed(value) {
                    self.speed = speed;
                }
                None
            }
            "progress" => {
                let finished = value == "end";
                Some(self.snapshot(finished))
            }
            _ => None,
        }
    }

    fn snapshot(&mut self, finished: bool) -> ProgressSnapshot {
        if finished {
            self.percent = 100.0;
        } else if self.duration_seconds > 0.0 {
            let pct = (self.current_time_seconds / self.duration_seconds * 100.0).min(100.0);
            self.percent = self.percent.max(pct);
        }
        ProgressSnapshot {
            current_time_seconds: self.current_time_seconds,
            speed: self.speed,
            percent: self.percent,
            finished,
        }
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }
}

/// Parse `1.53x` into `1.53`. `N/A` and junk yield `None`.
fn parse_speed(value: &str) -> Option<f64> {
    let n = value.strip_suffix('x').unwrap_or(value).trim();
    n.parse::<f64>().ok().filter(|s| s.is_finite() && *s >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut ProgressParser, text: &str) -> Vec<ProgressSnapshot> {
        text.lines().filter_map(|l| parser.feed(l)).collect()
    }

    #[test]
    fn emits_on_block_boundary() {
        let mut parser = ProgressParser::new(10.0);
        let snaps = feed_all(
            &mut parser,
            "frame=120\nfps=30.0\nout_time_us=2500000\nspeed=1.50x\nprogress=continue\n",
        );
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].current_time_seconds, 2.5);
        assert_eq!(snaps[0].speed, 1.5);
        assert_eq!(snaps[0].percent, 25.0);
        assert!(!snaps[0].finished);
    }

    #[test]
    fn out_time_ms_is_microseconds() {
        let mut parser = ProgressParser::new(4.0);
        parser.feed("out_time_ms=1000000");
        let snap = parser.feed("progress=continue").unwrap();
        assert_eq!(snap.current_time_seconds, 1.0);
        assert_eq!(snap.percent, 25.0);
    }

    #[test]
    fn percent_is_clamped_and_monotonic() {
        let mut parser = ProgressParser::new(10.0);
        let snaps = feed_all(
            &mut parser,
            "out_time_us=6000000\nprogress=continue\n\
             out_time_us=4000000\nprogress=continue\n\
             out_time_us=15000000\nprogress=end\n",
        );
        let pcts: Vec<f64> = snaps.iter().map(|s| s.percent).collect();
        assert_eq!(pcts, vec![60.0, 60.0, 100.0]);
        assert!(snaps[2].finished);
    }

    #[test]
    fn ignores_noise_and_na() {
        let mut parser = ProgressParser::new(10.0);
        assert!(parser.feed("").is_none());
        assert!(parser.feed("[mp3 @ 0x55] Estimating duration").is_none());
        assert!(parser.feed("out_time_us=N/A").is_none());
        assert!(parser.feed("speed=N/A").is_none());
        let snap = parser.feed("progress=continue").unwrap();
        assert_eq!(snap.percent, 0.0);
        assert_eq!(snap.speed, 0.0);
    }

    #[test]
    fn unknown_duration_reports_zero_until_end() {
        let mut parser = ProgressParser::new(0.0);
        parser.feed("out_time_us=5000000");
        let snap = parser.feed("progress=continue").unwrap();
        assert_eq!(snap.percent, 0.0);
        assert_eq!(snap.current_time_seconds, 5.0);

        let end = parser.feed("progress=end").unwrap();
        assert!(end.finished);
        assert_eq!(end.percent, 100.0);
    }

    #[test]
    fn speed_parsing() {
        assert_eq!(parse_speed("2.01x"), Some(2.01));
        assert_eq!(parse_speed(" 0.5x"), Some(0.5));
        assert_eq!(parse_speed("N/A"), None);
        assert_eq!(parse_speed("-1x"), None);
    }
}
