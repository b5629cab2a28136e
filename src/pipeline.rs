//! End-to-end run: preprocess, rasterize, download, composite, cache.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tracing::{info, instrument};

use crate::{
    cache::ArtifactCache,
    compose,
    config::PipelineConfig,
    error::{FuseError, FuseResult},
    fetch::AssetFetcher,
    geometry, raster, svgdoc,
    temp::TempTracker,
};

/// A finished composition.
#[derive(Clone, Debug)]
pub struct RenderedVideo {
    /// Location of the MP4 inside the cache directory.
    pub path: PathBuf,
    /// Content-addressed cache key of the source document.
    pub key: String,
    /// Whether this run was served from cache without touching the network.
    pub cached: bool,
}

/// The media composition pipeline. One instance serves many concurrent runs;
/// the artifact cache is the only state shared between them.
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: AssetFetcher,
    cache: ArtifactCache,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> FuseResult<Self> {
        config.validate()?;
        let fetcher = AssetFetcher::new(config.fetch.clone())?;
        let cache = ArtifactCache::new(&config.cache)?;
        std::fs::create_dir_all(&config.cache.dir).with_context(|| {
            format!("create artifact directory '{}'", config.cache.dir.display())
        })?;
        Ok(Self {
            config,
            fetcher,
            cache,
        })
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Turn one SVG document into a composited MP4.
    ///
    /// The cache is consulted before any work starts and populated after a
    /// successful run. Every temp file acquired along the way is released
    /// before this returns, on success and failure alike; the finished
    /// artifact is encoded into a run-unique staging file and moved to its
    /// shared location only once the encode succeeds, so concurrent runs of
    /// one document never touch each other's output.
    #[instrument(skip_all)]
    pub async fn render(&self, svg: &str) -> FuseResult<RenderedVideo> {
        let normalized = svgdoc::normalize_for_hashing(svg)?;
        let key = svgdoc::cache_key(&normalized);

        if let Some(path) = self.cache.lookup(&key) {
            info!(key = %key, "reusing cached video");
            return Ok(RenderedVideo {
                path,
                key,
                cached: true,
            });
        }

        let temp = TempTracker::new();
        let result = self.render_uncached(svg, &key, &temp).await;
        temp.cleanup();
        let path = result?;

        self.cache.store(&key, path.clone());
        self.cache.sweep_expired();

        info!(key = %key, path = %path.display(), "composed video");
        Ok(RenderedVideo {
            path,
            key,
            cached: false,
        })
    }

    async fn render_uncached(
        &self,
        svg: &str,
        key: &str,
        temp: &TempTracker,
    ) -> FuseResult<PathBuf> {
        // All image embeds resolve (or soft-fail) before anything downstream
        // reads the document.
        let processed = svgdoc::embed_remote_images(svg, &self.fetcher).await?;

        let (clip_url, overlay, doc_width, doc_height) = {
            let doc = roxmltree::Document::parse(&processed)
                .map_err(|e| FuseError::input(format!("failed to parse processed svg: {e}")))?;
            let region = geometry::video_region(&doc)?;
            let url = geometry::video_url(region)?;
            let overlay = geometry::overlay_box(region, self.config.scale);
            let (w, h) = geometry::document_dimensions(&doc);
            (url, overlay, w, h)
        };

        let raster_width = ((doc_width as f64) * self.config.scale).trunc() as u32;
        let raster_height = ((doc_height as f64) * self.config.scale).trunc() as u32;

        // Rasterization and the clip download touch disjoint resources, so
        // they run concurrently; composition waits for both.
        let background = temp.create(".png")?;
        let raster_markup = processed.clone();
        let raster_out = background.clone();
        let raster_task = tokio::task::spawn_blocking(move || {
            raster::render_to_png(&raster_markup, raster_width, raster_height, &raster_out)
        });
        let video_task = self.fetcher.fetch_video(&clip_url, temp);

        let (raster_res, video_res) = tokio::join!(raster_task, video_task);
        let clip = video_res?;
        raster_res.map_err(|e| FuseError::render(format!("raster task failed: {e}")))??;

        let staged = temp.create(".mp4")?;
        compose::compose(&background, &clip, &overlay, &self.config.encode, &staged).await?;

        let out_path = self.config.cache.dir.join(format!("{key}.mp4"));
        persist_artifact(&staged, &out_path)?;
        Ok(out_path)
    }
}

/// Move the staged encode into its shared location. Rename swaps atomically
/// on one filesystem; a cross-device staging directory falls back to a copy
/// and leaves the staged file for the run's cleanup.
fn persist_artifact(staged: &Path, dest: &Path) -> FuseResult<()> {
    if std::fs::rename(staged, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(staged, dest)
        .with_context(|| format!("persist artifact to '{}'", dest.display()))?;
    Ok(())
}
