// SPDX-License-Identifier: MPL-2.0

//! Video file detection and decoder probing.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Container extensions accepted on import, compared case-insensitively.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4",  // MPEG-4 (H.264/HEVC)
    "m4v",  // MPEG-4 video
    "mov",  // QuickTime
    "webm", // VP8/VP9/AV1
    "mkv",  // Matroska
    "avi",
    "ogv", // Theora
];

/// Check if a path names a video container we import.
#[must_use]
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Expand `paths` into video files: files are kept if they are videos,
/// directories are walked recursively. Hidden entries are skipped.
pub fn collect_videos(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut videos = Vec::new();

    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.path()))
            {
                match entry {
                    Ok(entry) if entry.file_type().is_file() && is_video_file(entry.path()) => {
                        videos.push(entry.into_path());
                    }
                    Ok(_) => (),
                    Err(why) => warn!(?why, "failed to read directory entry"),
                }
            }
        } else if is_video_file(path) {
            videos.push(path.clone());
        } else {
            debug!(path = %path.display(), "not a video, skipped");
        }
    }

    videos
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

#[cfg(feature = "animated")]
pub use codecs::{CodecSupport, demote_broken_nvidia_decoders, get_codec_support};

#[cfg(feature = "animated")]
mod codecs {
    use std::sync::OnceLock;

    use gstreamer::prelude::PluginFeatureExtManual;
    use tracing::{debug, info, warn};

    const NVIDIA_DECODERS: &[&str] = &[
        "nvh264dec",
        "nvh265dec",
        "nvvp9dec",
        "nvav1dec",
        "nvmpegvideodec",
        "nvmpeg4videodec",
    ];

    const VAAPI_DECODERS: &[&str] = &[
        "vaapih264dec",
        "vaapih265dec",
        "vaapivp9dec",
        "vaapiav1dec",
        // VA plugin names from GStreamer 1.22 on
        "vah264dec",
        "vah265dec",
        "vavp9dec",
        "vaav1dec",
    ];

    /// HEVC encoders in order of preference.
    pub(crate) const HEVC_ENCODERS: &[&str] = &["vah265enc", "vaapih265enc", "nvh265enc", "x265enc"];

    static CODEC_SUPPORT: OnceLock<CodecSupport> = OnceLock::new();

    /// Decoders and encoders found in the GStreamer registry.
    #[derive(Debug, Clone, Default)]
    pub struct CodecSupport {
        pub has_nvidia: bool,
        pub has_vaapi: bool,
        pub hw_decoders: Vec<String>,
        /// Best available HEVC encoder, used when optimizing videos.
        pub hevc_encoder: Option<&'static str>,
    }

    /// Query the registry once and cache the result.
    pub fn get_codec_support() -> &'static CodecSupport {
        CODEC_SUPPORT.get_or_init(detect_codec_support)
    }

    fn detect_codec_support() -> CodecSupport {
        if gstreamer::init().is_err() {
            return CodecSupport::default();
        }

        let mut support = CodecSupport::default();

        for decoder in NVIDIA_DECODERS.iter().copied().filter(|name| found(name)) {
            support.has_nvidia = true;
            support.hw_decoders.push(decoder.to_owned());
        }
        for decoder in VAAPI_DECODERS.iter().copied().filter(|name| found(name)) {
            support.has_vaapi = true;
            support.hw_decoders.push(decoder.to_owned());
        }
        support.hevc_encoder = HEVC_ENCODERS.iter().copied().find(|name| found(name));

        if support.hw_decoders.is_empty() {
            warn!("no hardware video decoders found, decoding in software");
        }
        info!(
            has_nvidia = support.has_nvidia,
            has_vaapi = support.has_vaapi,
            decoders = ?support.hw_decoders,
            hevc_encoder = support.hevc_encoder,
            "detected video codec support"
        );

        support
    }

    fn found(name: &str) -> bool {
        gstreamer::ElementFactory::find(name).is_some()
    }

    /// NVIDIA plugins may be registered on machines where CUDA cannot start.
    /// Such decoders fail to instantiate, so drop their rank to keep
    /// `decodebin` from choosing them over a working decoder.
    pub fn demote_broken_nvidia_decoders() {
        static DEMOTED: std::sync::Once = std::sync::Once::new();

        DEMOTED.call_once(|| {
            for name in NVIDIA_DECODERS {
                let Some(factory) = gstreamer::ElementFactory::find(name) else {
                    continue;
                };
                if factory.create().build().is_ok() {
                    debug!(decoder = name, "NVIDIA decoder is functional");
                } else {
                    warn!(decoder = name, "NVIDIA decoder failed to instantiate, demoting");
                    factory.set_rank(gstreamer::Rank::NONE);
                }
            }
        });
    }
}
