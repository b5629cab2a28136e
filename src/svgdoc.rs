//! Document preprocessing: remote image embedding and hash normalization.
//!
//! Both passes stream quick-xml events and rewrite `image` elements in place,
//! so attribute order, whitespace and unrelated markup survive untouched. The
//! whole output is built before being returned; a parse failure never leaves a
//! partially rewritten document behind.

use std::collections::HashMap;

use base64::Engine as _;
use futures_util::StreamExt as _;
use quick_xml::{
    Reader, Writer,
    events::{BytesStart, Event},
};
use sha2::{Digest as _, Sha256};
use tracing::{debug, warn};

use crate::{
    error::{FuseError, FuseResult},
    fetch::AssetFetcher,
};

/// Stand-in href used when hashing, so documents that differ only in
/// already-resolved image bytes produce the same cache key.
pub const HREF_PLACEHOLDER: &str = "NORMALIZED";

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Replace every remote image reference with an inline `data:` URI.
///
/// Fetches run concurrently under the fetcher's bound. A failed fetch is a
/// soft failure: it is logged and the node keeps its remote href. The output
/// always declares the SVG and XLink namespaces on the root element so
/// downstream XML-aware consumers can resolve either href spelling.
pub async fn embed_remote_images(svg: &str, fetcher: &AssetFetcher) -> FuseResult<String> {
    let hrefs = collect_remote_image_hrefs(svg)?;
    if hrefs.is_empty() {
        return rewrite_image_hrefs(svg, true, |_| None);
    }

    let total = hrefs.len();
    let fetched: Vec<Option<(String, String)>> = futures_util::stream::iter(
        hrefs.into_iter().map(|url| async move {
            match fetcher.fetch_image(&url).await {
                Ok(img) => {
                    let payload = base64::engine::general_purpose::STANDARD.encode(&img.bytes);
                    Some((url, format!("data:{};base64,{payload}", img.mime)))
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "image fetch failed; leaving remote href in place");
                    None
                }
            }
        }),
    )
    .buffer_unordered(fetcher.image_concurrency())
    .collect()
    .await;

    let resolved: HashMap<String, String> = fetched.into_iter().flatten().collect();
    debug!(embedded = resolved.len(), total, "embedded remote images");

    rewrite_image_hrefs(svg, true, |href| resolved.get(href).cloned())
}

/// Canonical form of the document used only for cache-key hashing: the
/// effective href of every image element is replaced with a fixed placeholder.
pub fn normalize_for_hashing(svg: &str) -> FuseResult<String> {
    rewrite_image_hrefs(svg, false, |_| Some(HREF_PLACEHOLDER.to_string()))
}

/// Cache key for a normalized document: lowercase hex SHA-256.
pub fn cache_key(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Remote hrefs of all image elements, in document order, deduplicated.
pub fn collect_remote_image_hrefs(svg: &str) -> FuseResult<Vec<String>> {
    let mut reader = Reader::from_str(svg);
    let mut seen = Vec::new();
    loop {
        match reader.read_event() {
            Err(e) => return Err(parse_error(e)),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if !is_image_element(&e) {
                    continue;
                }
                if let Some((_, href)) = effective_href(&e)?
                    && href.starts_with("http")
                    && !seen.contains(&href)
                {
                    seen.push(href);
                }
            }
            Ok(_) => {}
        }
    }
    Ok(seen)
}

/// Streamed rewrite pass shared by embedding and normalization.
///
/// `replace` sees the effective href of each image element and returns the new
/// value, or `None` to leave the node untouched. When `ensure_namespaces` is
/// set, missing `xmlns`/`xmlns:xlink` declarations are added to the root
/// element.
fn rewrite_image_hrefs<F>(svg: &str, ensure_namespaces: bool, mut replace: F) -> FuseResult<String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut reader = Reader::from_str(svg);
    let mut writer = Writer::new(Vec::new());
    let mut root_seen = false;

    loop {
        let event = match reader.read_event() {
            Err(e) => return Err(parse_error(e)),
            Ok(Event::Eof) => break,
            Ok(ev) => ev,
        };

        let (rewritten, is_start) = match &event {
            Event::Start(e) => (
                rewrite_element(e, ensure_namespaces, &mut root_seen, &mut replace)?,
                true,
            ),
            Event::Empty(e) => (
                rewrite_element(e, ensure_namespaces, &mut root_seen, &mut replace)?,
                false,
            ),
            _ => (None, false),
        };

        let result = match rewritten {
            Some(elem) if is_start => writer.write_event(Event::Start(elem)),
            Some(elem) => writer.write_event(Event::Empty(elem)),
            None => writer.write_event(event),
        };
        result.map_err(|e| FuseError::input(format!("failed to serialize svg markup: {e}")))?;
    }

    String::from_utf8(writer.into_inner())
        .map_err(|e| FuseError::input(format!("rewritten svg is not valid utf-8: {e}")))
}

fn rewrite_element<F>(
    e: &BytesStart<'_>,
    ensure_namespaces: bool,
    root_seen: &mut bool,
    replace: &mut F,
) -> FuseResult<Option<BytesStart<'static>>>
where
    F: FnMut(&str) -> Option<String>,
{
    if is_image_element(e) {
        return rewrite_image_element(e, replace);
    }
    if ensure_namespaces && !*root_seen && e.local_name().as_ref() == b"svg" {
        *root_seen = true;
        return Ok(Some(with_namespace_decls(e)?));
    }
    Ok(None)
}

fn rewrite_image_element<F>(
    e: &BytesStart<'_>,
    replace: &mut F,
) -> FuseResult<Option<BytesStart<'static>>>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some((key, value)) = effective_href(e)? else {
        return Ok(None);
    };
    let Some(new_value) = replace(&value) else {
        return Ok(None);
    };

    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| FuseError::input(format!("malformed svg attribute: {e}")))?;
        let attr_key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if attr_key == key {
            out.push_attribute((attr_key.as_str(), new_value.as_str()));
        } else {
            let value = attr
                .unescape_value()
                .map_err(|e| FuseError::input(format!("malformed svg attribute value: {e}")))?;
            out.push_attribute((attr_key.as_str(), value.as_ref()));
        }
    }
    Ok(Some(out))
}

fn with_namespace_decls(e: &BytesStart<'_>) -> FuseResult<BytesStart<'static>> {
    let mut has_svg_ns = false;
    let mut has_xlink_ns = false;
    for attr in e.attributes() {
        let attr = attr.map_err(|e| FuseError::input(format!("malformed svg attribute: {e}")))?;
        match attr.key.as_ref() {
            b"xmlns" => has_svg_ns = true,
            b"xmlns:xlink" => has_xlink_ns = true,
            _ => {}
        }
    }

    let mut out = e.clone().into_owned();
    if !has_svg_ns {
        out.push_attribute(("xmlns", SVG_NS));
    }
    if !has_xlink_ns {
        out.push_attribute(("xmlns:xlink", XLINK_NS));
    }
    Ok(out)
}

fn is_image_element(e: &BytesStart<'_>) -> bool {
    e.local_name().as_ref() == b"image"
}

/// The image element's href under either recognized spelling. The namespaced
/// attribute takes precedence over the plain one.
fn effective_href(e: &BytesStart<'_>) -> FuseResult<Option<(String, String)>> {
    let mut plain: Option<(String, String)> = None;
    let mut namespaced: Option<(String, String)> = None;
    for attr in e.attributes() {
        let attr = attr.map_err(|e| FuseError::input(format!("malformed svg attribute: {e}")))?;
        if attr.key.local_name().as_ref() != b"href" {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| FuseError::input(format!("malformed svg attribute value: {e}")))?
            .into_owned();
        if attr.key.prefix().is_some() {
            namespaced.get_or_insert((key, value));
        } else {
            plain.get_or_insert((key, value));
        }
    }
    Ok(namespaced.or(plain))
}

fn parse_error(e: quick_xml::Error) -> FuseError {
    FuseError::input(format!("failed to parse svg markup: {e}"))
}
