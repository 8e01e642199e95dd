use serde_json::Value;

use crate::models::{coerce_price, features_from_value, DraftEdit, ListingDraft, Price};

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("Price must be a number, got {0}")]
    Price(String),
}

/// Applies the editor form to a draft snapshot and returns the next revision.
/// On error the input draft is untouched.
pub fn apply_edit(draft: &ListingDraft, edit: DraftEdit) -> Result<ListingDraft, EditError> {
    let price = match edit.price {
        Some(value) => Price::new(
            coerce_price(&value).ok_or_else(|| EditError::Price(describe_value(&value)))?,
            draft.price.currency.clone(),
        ),
        None => draft.price.clone(),
    };

    let text = |new: Option<String>, old: &str| {
        new.map(|v| v.trim().to_string())
            .unwrap_or_else(|| old.to_string())
    };

    let optional = |new: Option<String>, old: &Option<String>| match new {
        Some(v) if v.trim().is_empty() => None,
        Some(v) => Some(v.trim().to_string()),
        None => old.clone(),
    };

    let features = match edit.features {
        Some(value) => features_from_value(&value),
        None => draft.features.clone(),
    };

    Ok(ListingDraft {
        category: text(edit.category, &draft.category),
        title: text(edit.title, &draft.title),
        description: text(edit.description, &draft.description),
        features,
        price,
        location: optional(edit.location, &draft.location),
        contact: optional(edit.contact, &draft.contact),
        revision: draft.revision + 1,
    })
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        other => other.to_string(),
    }
}
