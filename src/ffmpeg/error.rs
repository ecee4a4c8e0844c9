//! Map FFmpeg/ffprobe exit codes to short messages for the front-end.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 is used for spawn failure.

use serde::Serialize;

const ELLIPSIS: &str = "…";
const SUMMARY_MAX_LEN: usize = 120;

/// Error payload sent to the front-end. `summary` goes in the info bar; `detail`
/// is the raw stderr for the output view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match exit_code {
        Some(code) => known_exit_code_summary(code)
            .unwrap_or_else(|| format!("FFmpeg failed (exit code {}).", code)),
        None => first_line_truncated(stderr, SUMMARY_MAX_LEN),
    };
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

fn known_exit_code_summary(code: i32) -> Option<String> {
    match code {
        -1 => Some("FFmpeg not found or failed to start.".into()),
        1 => Some("FFmpeg failed.".into()),
        69 => Some("Encoding rate limit exceeded.".into()),
        123 | 255 => Some("Encoding was stopped.".into()),
        _ => None,
    }
}

fn first_line_truncated(stderr: &str, max_len: usize) -> String {
    let first = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if first.len() <= max_len {
        return first.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !first.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &first[..cut], ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_1() {
        assert_eq!(parse_ffmpeg_error("", Some(1)).summary, "FFmpeg failed.");
    }

    #[test]
    fn exit_code_255_means_stopped() {
        assert_eq!(
            parse_ffmpeg_error("", Some(255)).summary,
            "Encoding was stopped."
        );
    }

    #[test]
    fn unknown_code_keeps_stderr_as_detail() {
        let p = parse_ffmpeg_error("  Invalid data found when processing input\n", Some(42));
        assert_eq!(p.summary, "FFmpeg failed (exit code 42).");
        assert_eq!(p.detail, "Invalid data found when processing input");
    }

    #[test]
    fn no_code_uses_first_non_empty_line() {
        let p = parse_ffmpeg_error("\n\nSome random error\nSecond line", None);
        assert_eq!(p.summary, "Some random error");
    }

    #[test]
    fn long_stderr_truncated_on_char_boundary() {
        let long = "é".repeat(100);
        let p = parse_ffmpeg_error(&long, None);
        assert!(p.summary.len() <= SUMMARY_MAX_LEN);
        assert!(p.summary.ends_with('…'));
    }
}
