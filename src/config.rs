use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::error::{FuseError, FuseResult};

/// Limits and timeouts for remote asset downloads.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub image_timeout_secs: u64,
    pub video_timeout_secs: u64,
    /// Declared-or-observed size ceiling for a single image.
    pub max_image_bytes: u64,
    /// Declared-or-observed size ceiling for the video clip.
    pub max_video_bytes: u64,
    /// How many image fetches may be in flight for one document.
    pub image_concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "framefuse/0.1".to_string(),
            image_timeout_secs: 10,
            video_timeout_secs: 20,
            max_image_bytes: 10 * 1024 * 1024,
            max_video_bytes: 100 * 1024 * 1024,
            image_concurrency: 8,
        }
    }
}

impl FetchConfig {
    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }

    pub fn video_timeout(&self) -> Duration {
        Duration::from_secs(self.video_timeout_secs)
    }

    pub fn validate(&self) -> FuseResult<()> {
        if self.image_timeout_secs == 0 || self.video_timeout_secs == 0 {
            return Err(FuseError::input("fetch timeouts must be non-zero"));
        }
        if self.max_image_bytes == 0 || self.max_video_bytes == 0 {
            return Err(FuseError::input("fetch size ceilings must be non-zero"));
        }
        if self.image_concurrency == 0 {
            return Err(FuseError::input("image_concurrency must be non-zero"));
        }
        Ok(())
    }
}

/// Fixed encoder parameters. These are configuration, never derived from input.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    pub fps: u32,
    pub crf: u32,
    pub preset: String,
    pub tune: String,
    pub audio_bitrate: String,
    /// Wall-clock limit on one ffmpeg invocation, distinct from network timeouts.
    pub timeout_secs: u64,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            fps: 24,
            crf: 28,
            preset: "ultrafast".to_string(),
            tune: "fastdecode".to_string(),
            audio_bitrate: "128k".to_string(),
            timeout_secs: 120,
        }
    }
}

impl EncodeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> FuseResult<()> {
        if self.fps == 0 {
            return Err(FuseError::input("encode fps must be non-zero"));
        }
        if self.crf > 51 {
            return Err(FuseError::input("encode crf must be in 0..=51"));
        }
        if self.preset.is_empty() || self.tune.is_empty() || self.audio_bitrate.is_empty() {
            return Err(FuseError::input(
                "encode preset/tune/audio_bitrate must be non-empty",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(FuseError::input("encode timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Artifact cache tuning. The cache itself lives in memory; `dir` holds the
/// finished MP4 files it points at.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("generated_videos"),
            ttl_secs: 600,
            max_entries: 100,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> FuseResult<()> {
        if self.max_entries == 0 {
            return Err(FuseError::input("cache max_entries must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Applied to both the raster resolution and the overlay box.
    pub scale: f64,
    pub fetch: FetchConfig,
    pub encode: EncodeConfig,
    pub cache: CacheConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scale: 1.2,
            fetch: FetchConfig::default(),
            encode: EncodeConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> FuseResult<()> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(FuseError::input("scale must be a finite positive number"));
        }
        self.fetch.validate()?;
        self.encode.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut cfg = PipelineConfig::default();
        cfg.scale = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.encode.fps = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.encode.crf = 52;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.cache.max_entries = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.fetch.image_concurrency = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_partial_overrides() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"scale": 2.0, "encode": {"crf": 23}}"#).unwrap();
        assert_eq!(cfg.scale, 2.0);
        assert_eq!(cfg.encode.crf, 23);
        assert_eq!(cfg.encode.fps, 24);
        assert_eq!(cfg.cache.max_entries, 100);
    }
}
