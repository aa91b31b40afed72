//! Named output profiles.

use serde::Serialize;

/// Target format value meaning "keep the downloaded file as is".
pub const ORIGINAL_FORMAT: &str = "original";

/// A resolved output profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputProfile {
    pub key: String,
    pub name: String,
    pub extension: String,
    /// ffmpeg output arguments, placed between the input and output path.
    #[serde(skip)]
    pub args: Vec<String>,
}

struct ProfileDef {
    key: &'static str,
    name: &'static str,
    extension: &'static str,
    args: &'static [&'static str],
}

const PROFILES: &[ProfileDef] = &[
    ProfileDef {
        key: "youtube_hd",
        name: "YouTube HD (MP4)",
        extension: "mp4",
        args: &[
            "-c:v", "libx264", "-preset", "fast", "-crf", "23", "-c:a", "aac", "-b:a", "192k",
            "-vf", "scale=1920:1080",
        ],
    },
    ProfileDef {
        key: "instagram_story",
        name: "Instagram Story (MP4)",
        extension: "mp4",
        args: &[
            "-c:v", "libx264", "-preset", "fast", "-crf", "25", "-c:a", "aac", "-b:a", "128k",
            "-vf", "scale=1080:1920",
        ],
    },
    ProfileDef {
        key: "audio_mp3",
        name: "Audio MP3",
        extension: "mp3",
        args: &["-vn", "-ar", "44100", "-ac", "2", "-b:a", "192k"],
    },
    ProfileDef {
        key: "gif",
        name: "Animated GIF",
        extension: "gif",
        args: &["-vf", "scale=480:-1", "-r", "10"],
    },
    ProfileDef {
        key: "hls",
        name: "HLS Streaming",
        extension: "m3u8",
        // Segment naming is appended by the backend
        args: &[
            "-c:v", "libx264", "-c:a", "aac", "-f", "hls", "-hls_time", "4", "-hls_list_size",
            "0",
        ],
    },
    ProfileDef {
        key: "webm",
        name: "WebM (VP9)",
        extension: "webm",
        args: &["-c:v", "libvpx-vp9", "-crf", "30", "-b:v", "0", "-c:a", "libopus"],
    },
    ProfileDef {
        key: "thumbnail",
        name: "Thumbnail",
        extension: "jpg",
        args: &["-ss", "00:00:01", "-vframes", "1", "-vf", "scale=320:180"],
    },
];

impl OutputProfile {
    fn from_def(def: &ProfileDef) -> Self {
        Self {
            key: def.key.to_string(),
            name: def.name.to_string(),
            extension: def.extension.to_string(),
            args: def.args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Resolves a profile key or a bare extension token.
    ///
    /// Bare tokens (e.g. `mp3`) produce a profile with no extra arguments,
    /// leaving codec choice to ffmpeg's defaults for that container.
    pub fn resolve(token: &str) -> Option<Self> {
        if let Some(def) = PROFILES.iter().find(|p| p.key == token) {
            return Some(Self::from_def(def));
        }
        if is_bare_extension(token) {
            return Some(Self {
                key: token.to_string(),
                name: token.to_uppercase(),
                extension: token.to_string(),
                args: Vec::new(),
            });
        }
        None
    }

    pub fn is_hls(&self) -> bool {
        self.key == "hls"
    }
}

/// All named profiles, in display order.
pub fn builtin_profiles() -> Vec<OutputProfile> {
    PROFILES.iter().map(OutputProfile::from_def).collect()
}

fn is_bare_extension(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 8
        && token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Normalises a requested target format.
///
/// Empty values and `original` mean "no conversion" and become `None`.
pub fn normalize_target_format(format: Option<&str>) -> Option<String> {
    let format = format?.trim().to_ascii_lowercase();
    if format.is_empty() || format == ORIGINAL_FORMAT {
        None
    } else {
        Some(format)
    }
}

/// Whether a normalised target format can be handed to a transcoder.
pub fn is_supported_format(format: &str) -> bool {
    OutputProfile::resolve(format).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_named_profile() {
        let profile = OutputProfile::resolve("audio_mp3").unwrap();
        assert_eq!(profile.extension, "mp3");
        assert!(profile.args.contains(&"-vn".to_string()));
        assert!(!profile.is_hls());
    }

    #[test]
    fn test_resolve_bare_extension() {
        let profile = OutputProfile::resolve("mkv").unwrap();
        assert_eq!(profile.extension, "mkv");
        assert!(profile.args.is_empty());
    }

    #[test]
    fn test_resolve_rejects_odd_tokens() {
        assert!(OutputProfile::resolve("").is_none());
        assert!(OutputProfile::resolve("../etc").is_none());
        assert!(OutputProfile::resolve("MP4").is_none());
        assert!(OutputProfile::resolve("a b").is_none());
    }

    #[test]
    fn test_normalize_target_format() {
        assert_eq!(normalize_target_format(None), None);
        assert_eq!(normalize_target_format(Some("")), None);
        assert_eq!(normalize_target_format(Some("original")), None);
        assert_eq!(normalize_target_format(Some("Original")), None);
        assert_eq!(normalize_target_format(Some(" MP3 ")), Some("mp3".to_string()));
    }

    #[test]
    fn test_builtin_profiles() {
        let keys: Vec<String> = builtin_profiles().into_iter().map(|p| p.key).collect();
        assert_eq!(
            keys,
            vec![
                "youtube_hd",
                "instagram_story",
                "audio_mp3",
                "gif",
                "hls",
                "webm",
                "thumbnail"
            ]
        );
    }
}
