use url::Url;

use crate::flyer::Flyer;
use crate::models::ListingDraft;

pub const FLYER_FILENAME: &str = "marketplace_flyer.png";
const WHATSAPP_URL: &str = "https://wa.me/";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("PNG encoding failed: {0}")]
    Png(#[from] png::EncodingError),
}

// ── PNG ──────────────────────────────────────────────────────────────────────

/// Serializes the flyer as an 8-bit RGB PNG. The text layer goes into iTXt
/// chunks ahead of the pixel data so it survives as UTF-8.
pub fn encode_png(flyer: &Flyer) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buf, flyer.image.width(), flyer.image.height());
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        for (keyword, text) in &flyer.text_layer {
            encoder.add_itxt_chunk(keyword.clone(), text.clone())?;
        }
        let mut writer = encoder.write_header()?;
        writer.write_image_data(flyer.image.as_raw())?;
        writer.finish()?;
    }
    Ok(buf)
}

pub fn attachment_disposition() -> String {
    format!("attachment; filename=\"{}\"", FLYER_FILENAME)
}

// ── Share links ──────────────────────────────────────────────────────────────

/// Message text for chat apps; the recipient opens the link to get the image.
pub fn share_message(draft: &ListingDraft, flyer_url: &str) -> String {
    format!(
        "*{}*\nPrice: {}\n{}\n\n_Shared via Snap & Sell_",
        draft.title,
        draft.price.display(),
        flyer_url
    )
}

pub fn whatsapp_link(draft: &ListingDraft, flyer_url: &str) -> String {
    let message = share_message(draft, flyer_url);
    match Url::parse_with_params(WHATSAPP_URL, &[("text", message.as_str())]) {
        Ok(url) => url.to_string(),
        Err(_) => WHATSAPP_URL.to_string(),
    }
}

/// Origin the page was reached through: the configured public URL if any,
/// else the forwarded scheme and host the platform's front end passed along.
/// A host that is not a plain `name[:port]` falls back to `localhost`.
pub fn public_base(
    configured: Option<&Url>,
    forwarded_proto: Option<&str>,
    host: Option<&str>,
) -> String {
    if let Some(url) = configured {
        return url.as_str().trim_end_matches('/').to_string();
    }
    let scheme = forwarded_proto
        .and_then(|p| p.split(',').next())
        .map(str::trim)
        .filter(|p| *p == "http" || *p == "https")
        .unwrap_or("http");
    let host = host
        .map(str::trim)
        .filter(|h| is_plain_host(h))
        .unwrap_or("localhost");
    format!("{}://{}", scheme, host)
}

fn is_plain_host(host: &str) -> bool {
    !host.is_empty()
        && !host
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '\\' | '@' | '?' | '#'))
        && Url::parse(&format!("http://{}", host))
            .map(|u| u.host_str().is_some() && u.path() == "/")
            .unwrap_or(false)
}
