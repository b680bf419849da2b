use serde::{Deserialize, Serialize};

use trolley_core::currency::parse_price_cents;

/// Structured reading of one shopping-list entry. The canonical key groups
/// entries that mean the same product family ("2x Lactantia 1% Milk" and
/// "milk" both key to "milk").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedGoal {
    pub original_text: String,
    pub quantity: u32,
    #[serde(default)]
    pub quantity_string: Option<String>,
    #[serde(default)]
    pub unit_descriptor: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    pub category: String,
    #[serde(default)]
    pub qualifiers: Vec<String>,
}

impl NormalizedGoal {
    pub fn canonical_key(&self) -> String {
        slugify(&self.category)
    }

    pub fn category_label(&self) -> &str {
        &self.category
    }

    /// A specific request names a brand or carries qualifiers; default
    /// preferences never apply to it.
    pub fn is_specific_request(&self) -> bool {
        self.brand.is_some() || self.qualifiers.iter().any(|q| !q.trim().is_empty())
    }
}

/// Lowercase alphanumeric key with hyphen-collapsed separators.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut prev_hyphen = false;
    for ch in value.to_lowercase().chars() {
        if ch.is_alphanumeric() {
            slug.push(ch);
            prev_hyphen = false;
        } else if !prev_hyphen {
            slug.push('-');
            prev_hyphen = true;
        }
    }
    slug.trim_matches('-').to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_iso: Option<String>,
}

/// Remembered default product for a canonical key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    pub product_name: String,
    #[serde(default)]
    pub metadata: PreferenceMetadata,
}

/// One candidate product shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductChoice {
    pub title: String,
    pub price_text: String,
}

impl ProductChoice {
    pub fn new(title: impl Into<String>, price_text: impl Into<String>) -> Self {
        let price_text: String = price_text.into();
        let price_text = if price_text.starts_with('$') {
            price_text
        } else {
            format!("${price_text}")
        };
        Self {
            title: title.into(),
            price_text,
        }
    }

    pub fn price_cents(&self) -> i64 {
        parse_price_cents(&self.price_text).unwrap_or(0)
    }
}

pub const MAX_CHOICES: usize = 10;

/// Prompt payload sent to the messenger. Construction caps the option list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceRequest {
    pub category_label: String,
    pub original_text: String,
    pub choices: Vec<ProductChoice>,
}

impl ChoiceRequest {
    pub fn new(
        category_label: impl Into<String>,
        original_text: impl Into<String>,
        mut choices: Vec<ProductChoice>,
    ) -> Self {
        choices.truncate(MAX_CHOICES);
        Self {
            category_label: category_label.into(),
            original_text: original_text.into(),
            choices,
        }
    }
}

/// The user's answer to a choice prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceDecision {
    Selected {
        /// 1-based index into the request's choices.
        index: usize,
        choice: ProductChoice,
        make_default: bool,
    },
    /// Free-text replacement for the whole list entry.
    Alternate { text: String },
    Skip { message: Option<String> },
}

/// Replacement shopping instructions supplied by the user mid-item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRequest {
    pub previous_text: String,
    pub override_text: String,
    /// The parsed goal the override supersedes, kept for reporting. The
    /// override text itself is normalized afresh on restart.
    pub normalized: NormalizedGoal,
    pub source: String,
    /// True when the override replaces the original list entry text rather
    /// than an earlier override.
    pub supersedes_original: bool,
}
