use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::intake::{flatten_onto_white, Upload};
use crate::models::{coerce_price, features_from_value, ListingDraft, Price};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "snap-sell-web/1.0";
const JPEG_QUALITY: u8 = 90;
/// Longest edge sent upstream; phone photos are scaled down to this.
const MAX_EDGE: u32 = 2048;
const MAX_TOKENS: u32 = 500;
const MAX_LOGGED_BODY: usize = 300;

const PROMPT: &str = "You are an expert in second-hand item listings for an Indian marketplace. \
Look at the photo and answer with a single JSON object with exactly these keys:\n\
\"category\": the type of item (e.g. Furniture, Electronics, Clothing),\n\
\"title\": a catchy, concise title of at most 10 words,\n\
\"description\": two or three sentences describing the item and its visible condition,\n\
\"features\": an array of 3 to 5 key features, each under 10 words,\n\
\"price\": a fair second-hand price in INR as a plain number without symbols,\n\
\"location\": a location only if one is clearly visible in the photo, otherwise an empty string.\n\
Return only the JSON object.";

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```(?:json|JSON)?\s*(.*?)\s*```\s*$").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DescribeError {
    #[error("OPENAI_API_KEY is not configured")]
    MissingCredential,
    #[error("image could not be prepared: {0}")]
    Encode(String),
    #[error("{0}")]
    Request(String),
    #[error("inference service rejected the credential ({0})")]
    Auth(u16),
    #[error("inference service quota or rate limit exceeded")]
    Quota,
    #[error("inference service returned status {0}")]
    Upstream(u16),
    #[error("malformed answer: {0}")]
    Malformed(String),
}

// ── Describer ────────────────────────────────────────────────────────────────

/// Turns a photo into a fully populated [`ListingDraft`].
pub enum Describer {
    Remote(RemoteDescriber),
    /// Answers with a fixed draft and never leaves the process.
    Offline,
}

pub struct RemoteDescriber {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl Describer {
    pub fn from_config(config: &Config) -> Result<Self, DescribeError> {
        if config.offline {
            return Ok(Describer::Offline);
        }

        let client = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DescribeError::Request(e.to_string()))?;

        Ok(Describer::Remote(RemoteDescriber {
            client,
            endpoint: format!("{}/chat/completions", config.api_base),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }))
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Describer::Offline)
    }

    pub async fn describe(
        &self,
        upload: Arc<Upload>,
        currency: &str,
    ) -> Result<ListingDraft, DescribeError> {
        match self {
            Describer::Offline => {
                tracing::info!("offline mode, using fallback analysis");
                Ok(fallback_draft(currency))
            }
            Describer::Remote(remote) => remote.describe(upload, currency).await,
        }
    }
}

impl RemoteDescriber {
    async fn describe(
        &self,
        upload: Arc<Upload>,
        currency: &str,
    ) -> Result<ListingDraft, DescribeError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(DescribeError::MissingCredential)?;

        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&upload.image))
            .await
            .map_err(|e| DescribeError::Encode(e.to_string()))??;
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": PROMPT },
                    { "type": "image_url",
                      "image_url": { "url": format!("data:image/jpeg;base64,{}", STANDARD.encode(&jpeg)) } }
                ]
            }],
            "max_tokens": MAX_TOKENS,
            "response_format": { "type": "json_object" }
        });

        tracing::info!(model = %self.model, jpeg_bytes = jpeg.len(), "requesting description");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DescribeError::Request(format!("TimeoutError: {}", e))
                } else if e.is_connect() {
                    DescribeError::Request(format!("ConnectError: {}", e))
                } else {
                    DescribeError::Request(format!("RequestError: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                body = %truncate(&text, MAX_LOGGED_BODY),
                "inference service returned an error"
            );
            return Err(match status.as_u16() {
                401 | 403 => DescribeError::Auth(status.as_u16()),
                429 => DescribeError::Quota,
                code => DescribeError::Upstream(code),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| DescribeError::Malformed(format!("response body: {}", e)))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DescribeError::Malformed("no message content".to_string()))?;

        tracing::debug!(answer = %truncate(&content, MAX_LOGGED_BODY), "description received");
        parse_answer(&content, currency)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Answer {
    category: Option<String>,
    title: Option<String>,
    description: Option<String>,
    features: Option<Value>,
    price: Option<Value>,
    location: Option<String>,
}

// ── Answer parsing ───────────────────────────────────────────────────────────

/// Parses the model's JSON answer. Either every required field is present and
/// usable or the whole answer is rejected. Features and location are optional.
pub fn parse_answer(content: &str, currency: &str) -> Result<ListingDraft, DescribeError> {
    let json_text = FENCE_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content)
        .trim();

    let answer: Answer = serde_json::from_str(json_text)
        .map_err(|e| DescribeError::Malformed(format!("answer is not the expected JSON: {}", e)))?;

    let required = |value: Option<String>, name: &str| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DescribeError::Malformed(format!("missing {}", name)))
    };

    let category = required(answer.category, "category")?;
    let title = required(answer.title, "title")?;
    let description = required(answer.description, "description")?;
    let amount = answer
        .price
        .as_ref()
        .and_then(coerce_price)
        .ok_or_else(|| DescribeError::Malformed("missing or non-numeric price".to_string()))?;

    let location = answer
        .location
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    let features = answer
        .features
        .as_ref()
        .map(features_from_value)
        .unwrap_or_default();

    Ok(ListingDraft {
        category,
        title,
        description,
        features,
        price: Price::new(amount, currency),
        location,
        contact: None,
        revision: 0,
    })
}

pub fn fallback_draft(currency: &str) -> ListingDraft {
    ListingDraft {
        category: "General Item".to_string(),
        title: "Quality Second-hand Item".to_string(),
        description: "Great condition second-hand item available for sale. Contact for more details."
            .to_string(),
        features: vec![
            "Good condition".to_string(),
            "Well maintained".to_string(),
            "Ready for immediate use".to_string(),
        ],
        price: Price::new(1000, currency),
        location: None,
        contact: None,
        revision: 0,
    }
}

// ── Image preparation ────────────────────────────────────────────────────────

/// Scales down to [`MAX_EDGE`] if needed, flattens alpha and encodes as JPEG.
/// CPU-bound; callers run it on the blocking pool.
fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, DescribeError> {
    let rgb = if image.width().max(image.height()) > MAX_EDGE {
        flatten_onto_white(&image.resize(MAX_EDGE, MAX_EDGE, FilterType::Triangle))
    } else {
        flatten_onto_white(image)
    };
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| DescribeError::Encode(e.to_string()))?;
    Ok(buf)
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
