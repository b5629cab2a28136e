//! Background rendering: processed document -> PNG at the derived resolution.

use std::path::Path;

use tracing::debug;

use crate::error::{FuseError, FuseResult};

// Avoid pathological allocations from absurd document sizes.
const MAX_DIM: u32 = 16_384;

/// Render the preprocessed document to a PNG file of exactly
/// `width` x `height` pixels. Failures here are terminal: without a usable
/// background there is nothing to composite onto.
pub fn render_to_png(markup: &str, width: u32, height: u32, out: &Path) -> FuseResult<()> {
    if width == 0 || height == 0 {
        return Err(FuseError::render(format!(
            "raster dimensions must be non-zero (got {width}x{height})"
        )));
    }
    if width > MAX_DIM || height > MAX_DIM {
        return Err(FuseError::render(format!(
            "raster size too large: {width}x{height} (max {MAX_DIM}x{MAX_DIM})"
        )));
    }

    let options = usvg::Options::default();
    let tree = usvg::Tree::from_str(markup, &options)
        .map_err(|e| FuseError::render(format!("rasterizer rejected the document: {e}")))?;

    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| FuseError::render("failed to allocate raster pixmap"))?;

    let size = tree.size();
    let sx = (width as f32) / size.width();
    let sy = (height as f32) / size.height();
    resvg::render(
        &tree,
        resvg::tiny_skia::Transform::from_scale(sx, sy),
        &mut pixmap.as_mut(),
    );

    let data = demultiply_rgba8(pixmap.data());
    image::save_buffer_with_format(
        out,
        &data,
        width,
        height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|e| FuseError::render(format!("failed to write raster png '{}': {e}", out.display())))?;

    debug!(width, height, path = %out.display(), "rendered background raster");
    Ok(())
}

/// tiny-skia pixmaps are premultiplied; PNG wants straight alpha.
fn demultiply_rgba8(premul: &[u8]) -> Vec<u8> {
    let mut out = premul.to_vec();
    for px in out.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 || a == 255 {
            continue;
        }
        for c in px.iter_mut().take(3) {
            *c = (((*c as u16) * 255 + a / 2) / a).min(255) as u8;
        }
    }
    out
}
