#![forbid(unsafe_code)]

//! framefuse composites a remote video clip into an SVG layout: remote images
//! are embedded inline, the document is rasterized to a background frame, and
//! ffmpeg overlays the downloaded clip onto the designated video region,
//! producing a single MP4. Finished artifacts are cached by a hash of the
//! normalized document.

pub mod cache;
pub mod compose;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geometry;
pub mod pipeline;
pub mod raster;
pub mod store;
pub mod svgdoc;
pub mod temp;

pub use cache::ArtifactCache;
pub use config::{CacheConfig, EncodeConfig, FetchConfig, PipelineConfig};
pub use error::{FuseError, FuseResult};
pub use fetch::AssetFetcher;
pub use geometry::OverlayBox;
pub use pipeline::{Pipeline, RenderedVideo};
pub use store::{ArtifactStore, DirStore};
pub use temp::TempTracker;
