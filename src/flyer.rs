use ab_glyph::{FontArc, PxScale};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use once_cell::sync::Lazy;

use crate::intake::flatten_onto_white;
use crate::models::{ListingDraft, MAX_FEATURES};

// ── Template ─────────────────────────────────────────────────────────────────

pub const WIDTH: u32 = 1200;
pub const HEIGHT: u32 = 1600;

const BRAND: &str = "Snap & Sell";
const FOOTER: &str = "Created with Snap & Sell";
const DEFAULT_CALL_TO_ACTION: &str = "DM for details";

const TEAL: Rgb<u8> = Rgb([0, 128, 128]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const GRAY: Rgb<u8> = Rgb([100, 100, 100]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

const HEADER_HEIGHT: u32 = 120;
const PHOTO_TOP: i32 = 180;
const PHOTO_HEIGHT: u32 = 520;
const PHOTO_MAX_WIDTH: u32 = WIDTH - 100;
const BORDER_GAP: i32 = 10;
const BORDER_WIDTH: i32 = 5;
const MARGIN_X: i32 = 60;
const TEXT_WIDTH: u32 = WIDTH - 120;
const TITLE_MAX_LINES: usize = 2;
const DESCRIPTION_MAX_LINES: usize = 4;
const PRICE_BOX_MIN_WIDTH: u32 = 300;
const PRICE_BOX_HEIGHT: u32 = 100;
const CALL_TO_ACTION_Y: i32 = HEIGHT as i32 - 130;

const BRAND_SIZE: f32 = 40.0;
const TITLE_SIZE: f32 = 40.0;
const BODY_SIZE: f32 = 24.0;
const CALL_TO_ACTION_SIZE: f32 = 28.0;
const PRICE_SIZE: f32 = 48.0;
const FOOTER_SIZE: f32 = 18.0;

static REGULAR: Lazy<FontArc> = Lazy::new(|| {
    FontArc::try_from_slice(include_bytes!("../assets/fonts/DejaVuSans.ttf")).unwrap()
});

static BOLD: Lazy<FontArc> = Lazy::new(|| {
    FontArc::try_from_slice(include_bytes!("../assets/fonts/DejaVuSans-Bold.ttf")).unwrap()
});

// ── Public result type ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Flyer {
    pub image: RgbImage,
    /// The literal strings printed on the flyer, keyed by field.
    pub text_layer: Vec<(String, String)>,
    /// Draft revision this flyer was rendered from.
    pub revision: u64,
}

// ── Composer ─────────────────────────────────────────────────────────────────

/// Lays the photo and the draft onto the fixed template. Pure: the same photo
/// and draft always give the same pixels.
pub fn compose(photo: &DynamicImage, draft: &ListingDraft) -> Flyer {
    let mut canvas = RgbImage::from_pixel(WIDTH, HEIGHT, WHITE);

    // Header band with the brand.
    draw_filled_rect_mut(
        &mut canvas,
        Rect::at(0, 0).of_size(WIDTH, HEADER_HEIGHT),
        TEAL,
    );
    draw_centered(&mut canvas, 40, BRAND_SIZE, &BOLD, BRAND, WHITE);

    // Photo, bordered.
    let (photo_w, photo_h) = fit_photo(photo.width(), photo.height());
    let resized = imageops::resize(
        &flatten_onto_white(photo),
        photo_w,
        photo_h,
        FilterType::Lanczos3,
    );
    let photo_x = (WIDTH - photo_w) as i32 / 2;
    for i in 0..BORDER_WIDTH {
        let inset = BORDER_GAP - i;
        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(photo_x - inset, PHOTO_TOP - inset)
                .of_size(photo_w + 2 * inset as u32, photo_h + 2 * inset as u32),
            TEAL,
        );
    }
    imageops::overlay(&mut canvas, &resized, photo_x as i64, PHOTO_TOP as i64);

    // Text block.
    let mut y = PHOTO_TOP + photo_h as i32 + 50;

    let title_lines = wrap_lines(&draft.title, &BOLD, TITLE_SIZE, TEXT_WIDTH, TITLE_MAX_LINES);
    y = draw_lines(&mut canvas, &title_lines, MARGIN_X, y, TITLE_SIZE, &BOLD, BLACK);

    let category_line = format!("Category: {}", draft.category);
    y = draw_lines(
        &mut canvas,
        &[category_line.clone()],
        MARGIN_X,
        y + 10,
        BODY_SIZE,
        &REGULAR,
        GRAY,
    );

    let location_line = draft.location.as_ref().map(|l| format!("Location: {}", l));
    if let Some(line) = &location_line {
        y = draw_lines(&mut canvas, &[line.clone()], MARGIN_X, y, BODY_SIZE, &REGULAR, GRAY);
    }

    let description_lines = wrap_lines(
        &draft.description,
        &REGULAR,
        BODY_SIZE,
        TEXT_WIDTH,
        DESCRIPTION_MAX_LINES,
    );
    y = draw_lines(
        &mut canvas,
        &description_lines,
        MARGIN_X,
        y + 20,
        BODY_SIZE,
        &REGULAR,
        BLACK,
    );

    // One line per feature, cut to fit.
    let feature_lines: Vec<String> = draft
        .features
        .iter()
        .take(MAX_FEATURES)
        .filter_map(|f| {
            wrap_lines(&format!("- {}", f), &REGULAR, BODY_SIZE, TEXT_WIDTH, 1)
                .into_iter()
                .next()
        })
        .collect();
    y = draw_lines(
        &mut canvas,
        &feature_lines,
        MARGIN_X,
        y + 10,
        BODY_SIZE,
        &REGULAR,
        BLACK,
    );

    // Price box.
    let price_line = draft.price.display();
    let (price_w, price_h) = text_size(PxScale::from(PRICE_SIZE), &*BOLD, &price_line);
    let box_w = PRICE_BOX_MIN_WIDTH.max(price_w + 60).min(WIDTH);
    let box_y = y + 30;
    draw_filled_rect_mut(
        &mut canvas,
        Rect::at((WIDTH - box_w) as i32 / 2, box_y).of_size(box_w, PRICE_BOX_HEIGHT),
        TEAL,
    );
    draw_text_mut(
        &mut canvas,
        WHITE,
        (WIDTH as i32 - price_w as i32) / 2,
        box_y + (PRICE_BOX_HEIGHT as i32 - price_h as i32) / 2,
        PxScale::from(PRICE_SIZE),
        &*BOLD,
        &price_line,
    );

    let call_to_action = draft
        .contact
        .clone()
        .unwrap_or_else(|| DEFAULT_CALL_TO_ACTION.to_string());
    let call_to_action = wrap_lines(&call_to_action, &BOLD, CALL_TO_ACTION_SIZE, TEXT_WIDTH, 1)
        .join(" ");
    draw_centered(
        &mut canvas,
        CALL_TO_ACTION_Y,
        CALL_TO_ACTION_SIZE,
        &BOLD,
        &call_to_action,
        TEAL,
    );

    draw_centered(&mut canvas, HEIGHT as i32 - 60, FOOTER_SIZE, &REGULAR, FOOTER, GRAY);

    let mut text_layer = vec![
        ("Title".to_string(), title_lines.join(" ")),
        ("Category".to_string(), category_line),
    ];
    if let Some(line) = location_line {
        text_layer.push(("Location".to_string(), line));
    }
    text_layer.push(("Description".to_string(), description_lines.join(" ")));
    if !feature_lines.is_empty() {
        text_layer.push(("Features".to_string(), feature_lines.join("\n")));
    }
    text_layer.extend([
        ("Price".to_string(), price_line),
        (
            "Amount".to_string(),
            format!("{} {}", draft.price.amount, draft.price.currency),
        ),
        ("Contact".to_string(), call_to_action),
        ("Software".to_string(), FOOTER.to_string()),
    ]);

    Flyer {
        image: canvas,
        text_layer,
        revision: draft.revision,
    }
}

// ── Layout helpers ───────────────────────────────────────────────────────────

/// Scales to the photo slot height, then clamps the width, keeping aspect.
fn fit_photo(width: u32, height: u32) -> (u32, u32) {
    let (w, h) = (width.max(1) as u64, height.max(1) as u64);
    let mut target_h = PHOTO_HEIGHT as u64;
    let mut target_w = w * target_h / h;
    if target_w > PHOTO_MAX_WIDTH as u64 {
        target_w = PHOTO_MAX_WIDTH as u64;
        target_h = h * target_w / w;
    }
    (target_w.max(1) as u32, target_h.max(1) as u32)
}

/// Greedy word wrap. Lines past `max_lines` are dropped and the last kept line
/// gets an ellipsis.
fn wrap_lines(text: &str, font: &FontArc, size: f32, max_width: u32, max_lines: usize) -> Vec<String> {
    let scale = PxScale::from(size);
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{} {}", current, word);
        if text_size(scale, font, &candidate).0 <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            while !last.is_empty() && text_size(scale, font, &format!("{}…", last)).0 > max_width {
                last.pop();
            }
            let trimmed = last.trim_end().to_string();
            *last = format!("{}…", trimmed);
        }
    }
    lines
}

fn line_height(size: f32) -> i32 {
    (size * 1.5).round() as i32
}

/// Draws lines top-down and returns the y just below the last one.
fn draw_lines(
    canvas: &mut RgbImage,
    lines: &[String],
    x: i32,
    y: i32,
    size: f32,
    font: &FontArc,
    color: Rgb<u8>,
) -> i32 {
    let mut y = y;
    for line in lines {
        draw_text_mut(canvas, color, x, y, PxScale::from(size), font, line);
        y += line_height(size);
    }
    y
}

fn draw_centered(canvas: &mut RgbImage, y: i32, size: f32, font: &FontArc, text: &str, color: Rgb<u8>) {
    let scale = PxScale::from(size);
    let (w, _) = text_size(scale, font, text);
    draw_text_mut(canvas, color, (WIDTH as i32 - w as i32) / 2, y, scale, font, text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Price;

    fn photo() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(300, 200, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 90])
        }))
    }

    fn draft() -> ListingDraft {
        ListingDraft {
            category: "Furniture".to_string(),
            title: "Wooden Chair".to_string(),
            description: "Solid teak chair with a woven seat, lightly used.".to_string(),
            features: vec!["Solid teak frame".to_string(), "Woven cane seat".to_string()],
            price: Price::new(1200, "INR"),
            location: None,
            contact: None,
            revision: 0,
        }
    }

    fn layer<'a>(flyer: &'a Flyer, key: &str) -> Option<&'a str> {
        flyer
            .text_layer
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn renders_template_size_and_header() {
        let flyer = compose(&photo(), &draft());
        assert_eq!(flyer.image.dimensions(), (WIDTH, HEIGHT));
        assert_eq!(flyer.image.get_pixel(2, 2), &TEAL);
        assert_eq!(flyer.image.get_pixel(2, HEIGHT - 2), &WHITE);
    }

    #[test]
    fn text_layer_carries_the_draft() {
        let flyer = compose(&photo(), &draft());
        assert_eq!(layer(&flyer, "Title"), Some("Wooden Chair"));
        assert_eq!(layer(&flyer, "Category"), Some("Category: Furniture"));
        assert_eq!(layer(&flyer, "Price"), Some("Rs. 1,200"));
        assert_eq!(layer(&flyer, "Amount"), Some("1200 INR"));
        assert_eq!(layer(&flyer, "Location"), None);
        assert_eq!(
            layer(&flyer, "Features"),
            Some("- Solid teak frame\n- Woven cane seat")
        );
        assert_eq!(layer(&flyer, "Contact"), Some("DM for details"));
    }

    #[test]
    fn features_are_capped_and_contact_is_printed() {
        let mut many = draft();
        many.features = (1..=8).map(|i| format!("Point {}", i)).collect();
        many.contact = Some("Call Ravi on 98450 12345".to_string());
        let flyer = compose(&photo(), &many);
        let features = layer(&flyer, "Features").unwrap();
        assert_eq!(features.lines().count(), MAX_FEATURES);
        assert!(!features.contains("Point 6"));
        assert_eq!(layer(&flyer, "Contact"), Some("Call Ravi on 98450 12345"));

        let mut bare = draft();
        bare.features.clear();
        assert_eq!(layer(&compose(&photo(), &bare), "Features"), None);
    }

    #[test]
    fn fullest_layout_stays_above_the_call_to_action() {
        let mut full = draft();
        full.title = "word ".repeat(60);
        full.description = "word ".repeat(400);
        full.location = Some("Indiranagar, Bengaluru".to_string());
        full.features = (1..=5).map(|i| format!("Point {}", i)).collect();
        // Tall photo: the slot is used at full height.
        let tall = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 1000, Rgb([9, 9, 9])));
        let flyer = compose(&tall, &full);
        // The row just above the call to action is background white.
        let row = (CALL_TO_ACTION_Y - 4) as u32;
        assert!((0..WIDTH).all(|x| flyer.image.get_pixel(x, row) == &WHITE));
    }

    #[test]
    fn same_input_same_pixels() {
        let a = compose(&photo(), &draft());
        let b = compose(&photo(), &draft());
        assert_eq!(a.image.as_raw(), b.image.as_raw());
        assert_eq!(a.text_layer, b.text_layer);
    }

    #[test]
    fn edits_change_the_render() {
        let mut edited = draft();
        edited.title = "Teak Armchair".to_string();
        edited.location = Some("Pune".to_string());
        edited.revision = 1;
        let before = compose(&photo(), &draft());
        let after = compose(&photo(), &edited);
        assert_ne!(before.image.as_raw(), after.image.as_raw());
        assert_eq!(layer(&after, "Title"), Some("Teak Armchair"));
        assert_eq!(layer(&after, "Location"), Some("Location: Pune"));
        assert_eq!(after.revision, 1);
    }

    #[test]
    fn fits_photo_into_slot() {
        assert_eq!(fit_photo(300, 200), (780, 520));
        assert_eq!(fit_photo(4000, 1000), (1100, 275));
        assert_eq!(fit_photo(100, 1000), (52, 520));
    }

    #[test]
    fn wraps_and_truncates_long_text() {
        let long = "word ".repeat(400);
        let lines = wrap_lines(&long, &REGULAR, BODY_SIZE, TEXT_WIDTH, DESCRIPTION_MAX_LINES);
        assert_eq!(lines.len(), DESCRIPTION_MAX_LINES);
        assert!(lines.last().unwrap().ends_with('…'));
        assert!(wrap_lines("", &REGULAR, BODY_SIZE, TEXT_WIDTH, 2).is_empty());
        assert_eq!(
            wrap_lines("Wooden Chair", &BOLD, TITLE_SIZE, TEXT_WIDTH, 2),
            vec!["Wooden Chair".to_string()]
        );
    }
}
