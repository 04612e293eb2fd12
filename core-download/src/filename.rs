//! Media file naming
//!
//! Files are named after the last path segment of the download URL, reduced
//! to `[A-Za-z0-9._-]` and capped at [`MAX_FILE_NAME_LEN`] characters. When
//! the URL has no usable segment, the name is `audio_<millis>` plus an
//! extension guessed from the content type.

/// Longest file name produced from a URL.
pub const MAX_FILE_NAME_LEN: usize = 128;

/// Pick a file name for a download of `url`.
pub fn file_name_for(url: &str, content_type: Option<&str>, now_ms: i64) -> String {
    match last_path_segment(url).map(sanitize).filter(|name| is_usable(name)) {
        Some(name) => name,
        None => format!("audio_{}.{}", now_ms, extension_for(content_type)),
    }
}

/// The part of `name` before its extension, used as a fallback title.
pub fn title_from_file_name(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

fn last_path_segment(url: &str) -> Option<&str> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);

    let after_scheme = match without_query.split_once("://") {
        Some((_, rest)) => rest,
        None => without_query,
    };
    // Everything before the first '/' is the authority.
    let (_, path) = after_scheme.split_once('/')?;

    path.rsplit('/').find(|segment| !segment.is_empty())
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_LEN)
        .collect()
}

/// Reject names with nothing but separators, and the `.`/`..` specials.
fn is_usable(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_alphanumeric())
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match essence.as_deref() {
        Some("audio/mpeg") | Some("audio/mp3") => "mp3",
        Some("audio/mp4") | Some("audio/x-m4a") | Some("audio/m4a") => "m4a",
        Some("audio/aac") => "aac",
        Some("audio/ogg") => "ogg",
        Some("audio/opus") => "opus",
        Some("audio/webm") | Some("video/webm") => "webm",
        Some("audio/wav") | Some("audio/x-wav") | Some("audio/wave") => "wav",
        Some("audio/flac") | Some("audio/x-flac") => "flac",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_from_last_segment() {
        assert_eq!(
            file_name_for("https://cdn.example.com/music/song.mp3", None, 0),
            "song.mp3"
        );
        assert_eq!(
            file_name_for("https://cdn.example.com/a/b/track.m4a?sig=abc#t=10", None, 0),
            "track.m4a"
        );
        assert_eq!(
            file_name_for("https://cdn.example.com/album/", None, 0),
            "album"
        );
    }

    #[test]
    fn test_name_is_sanitized() {
        assert_eq!(
            file_name_for("https://example.com/My%20Song (live).mp3", None, 0),
            "My_20Song__live_.mp3"
        );
        assert_eq!(
            file_name_for("https://example.com/caf\u{e9}.ogg", None, 0),
            "caf_.ogg"
        );
    }

    #[test]
    fn test_name_is_capped() {
        let long = "a".repeat(300);
        let name = file_name_for(&format!("https://example.com/{long}.mp3"), None, 0);
        assert_eq!(name.len(), MAX_FILE_NAME_LEN);
    }

    #[test]
    fn test_fallback_uses_content_type() {
        assert_eq!(
            file_name_for("https://example.com", Some("audio/mpeg"), 1700),
            "audio_1700.mp3"
        );
        assert_eq!(
            file_name_for("https://example.com/", Some("audio/webm; codecs=opus"), 5),
            "audio_5.webm"
        );
        assert_eq!(
            file_name_for("https://example.com/..", Some("application/octet-stream"), 5),
            "audio_5.bin"
        );
        assert_eq!(file_name_for("https://example.com/%%%", None, 9), "audio_9.bin");
    }

    #[test]
    fn test_title_from_file_name() {
        assert_eq!(title_from_file_name("song.mp3"), "song");
        assert_eq!(title_from_file_name("my.live.set.ogg"), "my.live.set");
        assert_eq!(title_from_file_name("noext"), "noext");
        assert_eq!(title_from_file_name(".hidden"), ".hidden");
    }
}
