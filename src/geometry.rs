//! Numeric geometry extraction from markup attributes.
//!
//! Attribute values arrive as strings like `"850px"` or `"1,5"`. Every scalar
//! goes through the same cleanup: trim, strip a trailing `px`, normalize the
//! decimal separator, parse as float, truncate to integer.

use roxmltree::{Document, Node};

use crate::error::{FuseError, FuseResult};

/// Size used when a document declares neither width/height nor a viewBox.
pub const FALLBACK_DOC_SIZE: (u32, u32) = (1080, 1920);

/// Overlay box size used when the video region omits width/height. Distinct
/// from the document fallback on purpose.
pub const FALLBACK_OVERLAY_WIDTH: f64 = 850.0;
pub const FALLBACK_OVERLAY_HEIGHT: f64 = 600.0;

/// Placement of the video clip on the rendered background, in output pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    /// Corner radii are carried through unscaled.
    pub rx: i64,
    pub ry: i64,
}

/// Document dimensions, resolved in order: explicit width/height attributes,
/// then the viewBox's third and fourth tokens, then the fixed fallback.
/// Explicit size overrides viewBox; that order encodes the visual intent of
/// typical documents.
pub fn document_dimensions(doc: &Document<'_>) -> (u32, u32) {
    let root = doc.root_element();

    let width = root.attribute("width").and_then(parse_scalar);
    let height = root.attribute("height").and_then(parse_scalar);
    if let (Some(w), Some(h)) = (width, height) {
        return (truncate_dim(w), truncate_dim(h));
    }

    if let Some(view_box) = root.attribute("viewBox") {
        let tokens: Vec<&str> = view_box.split_whitespace().collect();
        if tokens.len() >= 4
            && let (Some(w), Some(h)) = (parse_scalar(tokens[2]), parse_scalar(tokens[3]))
        {
            return (truncate_dim(w), truncate_dim(h));
        }
    }

    FALLBACK_DOC_SIZE
}

/// The single node designating where the clip is composited. Candidates are
/// tried in order, first match by document order wins:
/// an element with `id="video-area"`, then any element whose id contains
/// "video" (case-insensitive), then any element carrying a video-locator
/// attribute. Absence is a terminal input failure.
pub fn video_region<'a, 'input>(doc: &'a Document<'input>) -> FuseResult<Node<'a, 'input>> {
    if let Some(node) = doc
        .descendants()
        .find(|n| n.attribute("id") == Some("video-area"))
    {
        return Ok(node);
    }
    if let Some(node) = doc.descendants().find(|n| {
        n.attribute("id")
            .is_some_and(|id| id.to_ascii_lowercase().contains("video"))
    }) {
        return Ok(node);
    }
    if let Some(node) = doc
        .descendants()
        .find(|n| n.attribute("video_url").is_some() || n.attribute("data-video-url").is_some())
    {
        return Ok(node);
    }
    Err(FuseError::input(
        "no video region found: expected an element with id=\"video-area\", \
         a video-like id, or a video_url attribute",
    ))
}

/// The region's video locator, trying `video_url` then `data-video-url`.
pub fn video_url(region: Node<'_, '_>) -> FuseResult<String> {
    region
        .attribute("video_url")
        .or_else(|| region.attribute("data-video-url"))
        .map(str::to_string)
        .ok_or_else(|| {
            FuseError::input(
                "video region carries neither a 'video_url' nor a 'data-video-url' attribute",
            )
        })
}

/// Overlay geometry for the region. x/y default to 0, width/height to the
/// overlay fallbacks; all four are scaled then truncated. rx/ry are parsed the
/// same way but never scaled.
pub fn overlay_box(region: Node<'_, '_>, scale: f64) -> OverlayBox {
    let scalar = |name: &str, fallback: f64| {
        region
            .attribute(name)
            .and_then(parse_scalar)
            .unwrap_or(fallback)
    };

    OverlayBox {
        x: (scalar("x", 0.0) * scale).trunc() as i64,
        y: (scalar("y", 0.0) * scale).trunc() as i64,
        width: (scalar("width", FALLBACK_OVERLAY_WIDTH) * scale).trunc() as i64,
        height: (scalar("height", FALLBACK_OVERLAY_HEIGHT) * scale).trunc() as i64,
        rx: scalar("rx", 0.0).trunc() as i64,
        ry: scalar("ry", 0.0).trunc() as i64,
    }
}

fn parse_scalar(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix("px").unwrap_or(trimmed).trim_end();
    let normalized = trimmed.replace(',', ".");
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn truncate_dim(v: f64) -> u32 {
    v.max(0.0).trunc() as u32
}
