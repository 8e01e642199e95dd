use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(-\s*)?(\d[\d,]*(?:\.\d+)?)").unwrap());

/// Bullets kept per listing; the flyer has room for this many.
pub const MAX_FEATURES: usize = 5;

// ── Listing draft ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Whole currency units.
    pub amount: u64,
    pub currency: String,
}

impl Price {
    pub fn new(amount: u64, currency: impl Into<String>) -> Self {
        Price {
            amount,
            currency: currency.into(),
        }
    }

    /// Short label printed before the amount.
    pub fn label(&self) -> &str {
        if self.currency == "INR" {
            "Rs."
        } else {
            &self.currency
        }
    }

    /// Amount with digit grouping: lakh/crore style for INR, thousands otherwise.
    pub fn grouped(&self) -> String {
        let digits = self.amount.to_string();
        if self.currency == "INR" {
            group_indian(&digits)
        } else {
            group_thousands(&digits)
        }
    }

    /// e.g. `Rs. 1,200`
    pub fn display(&self) -> String {
        format!("{} {}", self.label(), self.grouped())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingDraft {
    pub category: String,
    pub title: String,
    pub description: String,
    /// Short selling points, printed as bullets.
    pub features: Vec<String>,
    pub price: Price,
    pub location: Option<String>,
    /// Call-to-action line; the flyer says "DM for details" without one.
    pub contact: Option<String>,
    /// Bumped on every edit; a flyer is tied to one revision.
    pub revision: u64,
}

// ── Price coercion ───────────────────────────────────────────────────────────

/// Pulls a whole-unit amount out of a JSON number or a loosely formatted
/// string such as `"Rs. 1,200"` or `"₹ 950.50"`.
pub fn coerce_price(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => coerce_price_text(s),
        _ => None,
    }
}

/// Negative amounts are rejected rather than read as positive.
pub fn coerce_price_text(text: &str) -> Option<u64> {
    let caps = PRICE_RE.captures(text)?;
    if caps.get(1).is_some() {
        return None;
    }
    let cleaned = caps.get(2)?.as_str().replace(',', "");
    let whole = cleaned.split('.').next().unwrap_or("");
    whole.parse().ok()
}

// ── Features ─────────────────────────────────────────────────────────────────

/// Strips bullet markers, drops blank lines and caps the list.
pub fn clean_features<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| {
            item.as_ref()
                .trim()
                .trim_start_matches(['-', '*', '•'])
                .trim()
                .to_string()
        })
        .filter(|item| !item.is_empty())
        .take(MAX_FEATURES)
        .collect()
}

/// Accepts a JSON array of strings or one newline-separated string.
pub fn features_from_value(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => clean_features(items.iter().filter_map(Value::as_str)),
        Value::String(text) => clean_features(text.lines()),
        _ => Vec::new(),
    }
}

fn group_indian(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }
    let (head, last3) = digits.split_at(digits.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 2 {
        groups.push(&head[end - 2..end]);
        end -= 2;
    }
    groups.push(&head[..end]);
    groups.reverse();
    format!("{},{}", groups.join(","), last3)
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

// ── API payloads ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Serialize)]
pub struct DraftResponse {
    pub session_id: String,
    pub draft: ListingDraft,
    pub flyer_url: String,
}

/// Partial update from the editor form. Absent fields are left alone.
#[derive(Debug, Default, Deserialize)]
pub struct DraftEdit {
    pub category: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Array of strings or the editor's one-per-line text.
    pub features: Option<Value>,
    /// Number or free text; coerced on apply.
    pub price: Option<Value>,
    pub location: Option<String>,
    pub contact: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FlyerQuery {
    #[serde(default)]
    pub download: bool,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub flyer_url: String,
    pub download_url: String,
    pub whatsapp_url: String,
}
