//! Overlay composition via the external ffmpeg encoder.
//!
//! The clip is scaled up to cover the overlay box (aspect ratio preserved),
//! center-cropped to exactly the box, then alpha-composited onto the looped
//! background raster at the box offset. Output stops with the shorter input.

use std::{ffi::OsString, path::Path, process::Stdio};

use tracing::{debug, info};

use crate::{
    config::EncodeConfig,
    error::{FuseError, FuseResult},
    geometry::OverlayBox,
};

pub fn is_ffmpeg_on_path() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Two-stage filter graph: scale-with-cover + crop, then overlay.
pub fn build_filter_graph(bx: &OverlayBox) -> String {
    format!(
        "[1:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}[vid];\
         [0:v][vid]overlay={x}:{y}:shortest=1",
        w = bx.width,
        h = bx.height,
        x = bx.x,
        y = bx.y,
    )
}

/// The full, fixed ffmpeg argument list. No value here ever passes through a
/// shell; untrusted strings (paths, the filter graph) are argv entries only.
pub fn encoder_args(
    background: &Path,
    clip: &Path,
    filter_graph: &str,
    cfg: &EncodeConfig,
    out: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    for s in [
        "-y", "-threads", "1", "-loglevel", "error", "-loop", "1", "-r",
        &cfg.fps.to_string(), "-i",
    ] {
        args.push(s.into());
    }
    args.push(background.into());
    args.push("-i".into());
    args.push(clip.into());
    args.push("-filter_complex".into());
    args.push(filter_graph.into());
    for s in [
        "-c:a",
        "aac",
        "-b:a",
        &cfg.audio_bitrate,
        "-c:v",
        "libx264",
        "-preset",
        &cfg.preset,
        "-tune",
        &cfg.tune,
        "-movflags",
        "+faststart",
        "-crf",
        &cfg.crf.to_string(),
        "-f",
        "mp4",
    ] {
        args.push(s.into());
    }
    args.push(out.into());
    args
}

/// Composite `clip` onto `background` at the overlay box and encode `out`.
///
/// A non-zero exit is an encode failure carrying the captured stderr; running
/// past the configured wall clock is a distinct timeout failure.
pub async fn compose(
    background: &Path,
    clip: &Path,
    overlay: &OverlayBox,
    cfg: &EncodeConfig,
    out: &Path,
) -> FuseResult<()> {
    cfg.validate()?;

    let filter_graph = build_filter_graph(overlay);
    debug!(filter = %filter_graph, "built ffmpeg filter graph");

    let args = encoder_args(background, clip, &filter_graph, cfg, out);
    let child = tokio::process::Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            FuseError::encode(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

    let output = match tokio::time::timeout(cfg.timeout(), child.wait_with_output()).await {
        Err(_) => return Err(FuseError::EncodeTimeout(cfg.timeout())),
        Ok(res) => {
            res.map_err(|e| FuseError::encode(format!("failed to wait for ffmpeg: {e}")))?
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        debug!(stdout = %stdout.trim(), "ffmpeg stdout");
    }
    if !stderr.trim().is_empty() {
        debug!(stderr = %stderr.trim(), "ffmpeg stderr");
    }

    if !output.status.success() {
        return Err(FuseError::encode(format!(
            "ffmpeg exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    info!(out = %out.display(), "encoded composite video");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn filter_graph_matches_overlay_box() {
        let bx = OverlayBox {
            x: 20,
            y: 40,
            width: 600,
            height: 300,
            rx: 0,
            ry: 0,
        };
        assert_eq!(
            build_filter_graph(&bx),
            "[1:v]scale=600:300:force_original_aspect_ratio=increase,crop=600:300[vid];\
             [0:v][vid]overlay=20:40:shortest=1"
        );
    }

    #[test]
    fn encoder_args_are_fixed_and_ordered() {
        let cfg = EncodeConfig::default();
        let args = encoder_args(
            &PathBuf::from("/tmp/bg.png"),
            &PathBuf::from("/tmp/clip.mp4"),
            "GRAPH",
            &cfg,
            &PathBuf::from("/tmp/out.mp4"),
        );
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(args[0], "-y");
        assert_eq!(&args[1..3], &["-threads", "1"]);
        assert_eq!(&args[5..7], &["-loop", "1"]);
        assert_eq!(&args[7..9], &["-r", "24"]);
        let bg = args.iter().position(|a| a == "/tmp/bg.png").unwrap();
        let clip = args.iter().position(|a| a == "/tmp/clip.mp4").unwrap();
        assert!(bg < clip, "background must be input 0");
        assert_eq!(args[bg - 1], "-i");
        assert_eq!(args[clip - 1], "-i");
        let fc = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert_eq!(args[fc + 1], "GRAPH");
        assert!(args.windows(2).any(|w| w == ["-crf", "28"]));
        assert!(args.windows(2).any(|w| w == ["-preset", "ultrafast"]));
        assert!(args.windows(2).any(|w| w == ["-tune", "fastdecode"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "128k"]));
        assert!(args.windows(2).any(|w| w == ["-f", "mp4"]));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[tokio::test]
    async fn stalled_encoder_times_out_with_named_failure() {
        if !is_ffmpeg_on_path() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();

        let background = dir.path().join("bg.png");
        image::RgbaImage::from_pixel(64, 64, image::Rgba([0, 0, 0, 255]))
            .save(&background)
            .unwrap();

        // A FIFO with no writer blocks ffmpeg on open forever.
        let clip = dir.path().join("clip.mp4");
        let status = std::process::Command::new("mkfifo")
            .arg(&clip)
            .status()
            .unwrap();
        assert!(status.success(), "mkfifo failed");

        let mut cfg = EncodeConfig::default();
        cfg.timeout_secs = 1;
        let bx = OverlayBox {
            x: 0,
            y: 0,
            width: 32,
            height: 32,
            rx: 0,
            ry: 0,
        };
        let err = compose(
            &background,
            &clip,
            &bx,
            &cfg,
            &dir.path().join("out.mp4"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FuseError::EncodeTimeout(_)));
    }

    #[tokio::test]
    async fn missing_inputs_yield_encode_failure() {
        if !is_ffmpeg_on_path() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let bx = OverlayBox {
            x: 0,
            y: 0,
            width: 64,
            height: 64,
            rx: 0,
            ry: 0,
        };
        let err = compose(
            &dir.path().join("missing_bg.png"),
            &dir.path().join("missing_clip.mp4"),
            &bx,
            &EncodeConfig::default(),
            &dir.path().join("out.mp4"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FuseError::Encode(_)));
    }
}
