use async_trait::async_trait;

use trolley_core::{Error, Result};

use crate::types::NormalizedGoal;

#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(&self, item_text: &str) -> Result<NormalizedGoal>;
}

/// Deterministic list-entry parser. Splits quantity markers, size tokens,
/// container words, brands, and qualifiers away from the product category.
#[derive(Debug, Default)]
pub struct RuleNormalizer;

const SIZE_UNITS: &[&str] = &["l", "ml", "g", "kg", "oz", "lb", "lbs"];

const CONTAINER_WORDS: &[&str] = &[
    "box", "can", "loaf", "bunch", "bag", "carton", "bottle", "jar", "pack", "tub",
];

const QUALIFIER_WORDS: &[&str] = &[
    "organic", "unsalted", "salted", "whole", "skim", "fresh", "frozen", "smooth", "crunchy",
    "ripe", "lean",
];

// Store labels seen on metro.ca shelves; possessive forms are treated as
// brands without needing to be listed.
const KNOWN_BRANDS: &[&str] = &["lactantia", "pc", "compliments", "selection", "irresistibles"];

fn word_number(token: &str) -> Option<u32> {
    let value = match token {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        _ => return None,
    };
    Some(value)
}

/// Numeric quantity markers: "2", "2x", "x2".
fn numeric_quantity(token: &str) -> Option<u32> {
    let stripped = if let Some(rest) = token.strip_prefix('x') {
        rest
    } else if let Some(rest) = token.strip_suffix('x') {
        rest
    } else {
        token
    };
    if stripped.is_empty() || !stripped.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    stripped.parse().ok()
}

/// Size descriptors like "454g", "1.5l", or "6-pack" carry no shopping
/// intent and are dropped entirely.
fn is_size_token(token: &str) -> bool {
    if token.contains('-') && token.ends_with("pack") {
        return true;
    }
    let numeric_len = token
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .count();
    if numeric_len == 0 || numeric_len == token.len() {
        return false;
    }
    SIZE_UNITS.contains(&&token[numeric_len..])
}

fn is_possessive(token: &str) -> bool {
    let lower = token.to_lowercase();
    lower.ends_with("'s") || lower.ends_with("\u{2019}s")
}

#[async_trait]
impl Normalizer for RuleNormalizer {
    async fn normalize(&self, item_text: &str) -> Result<NormalizedGoal> {
        let trimmed = item_text.trim();
        if trimmed.is_empty() {
            return Err(Error::Preference(
                "cannot normalize an empty list entry".to_string(),
            ));
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let mut quantity: u32 = 1;
        let mut quantity_string: Option<String> = None;
        let mut unit_descriptor: Option<String> = None;
        let mut brand: Option<String> = None;
        let mut qualifiers: Vec<String> = Vec::new();
        let mut category_tokens: Vec<&str> = Vec::new();

        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            let lower = token.to_lowercase();
            let next_lower = tokens.get(i + 1).map(|t| t.to_lowercase());

            // "454 g" split across two tokens
            if token.chars().all(|c| c.is_ascii_digit())
                && next_lower
                    .as_deref()
                    .is_some_and(|n| SIZE_UNITS.contains(&n))
            {
                i += 2;
                continue;
            }

            if let Some(n) = word_number(&lower) {
                if next_lower.as_deref() == Some("dozen") {
                    quantity = n * 12;
                    quantity_string = Some(format!("{} {}", token, tokens[i + 1]));
                    i += 2;
                    continue;
                }
                if quantity_string.is_none() {
                    quantity = n;
                    quantity_string = Some(token.to_string());
                    i += 1;
                    continue;
                }
            }

            if lower == "dozen" {
                quantity = 12;
                quantity_string = Some(token.to_string());
                i += 1;
                continue;
            }

            if quantity_string.is_none() && tokens.len() > 1 {
                if let Some(n) = numeric_quantity(&lower) {
                    if n >= 1 {
                        quantity = n;
                        quantity_string = Some(token.to_string());
                        i += 1;
                        continue;
                    }
                }
            }

            if CONTAINER_WORDS.contains(&lower.as_str()) && next_lower.as_deref() == Some("of") {
                unit_descriptor = Some(token.to_string());
                i += 2;
                continue;
            }

            // Usage hints trail the entry ("milk for baking").
            if lower == "for" && i + 1 < tokens.len() {
                qualifiers.push(tokens[i..].join(" "));
                break;
            }

            if is_size_token(&lower) {
                i += 1;
                continue;
            }

            if lower == "gluten" && next_lower.as_deref() == Some("free") {
                qualifiers.push(format!("{} {}", token, tokens[i + 1]));
                i += 2;
                continue;
            }

            if lower.ends_with('%') || QUALIFIER_WORDS.contains(&lower.as_str()) {
                qualifiers.push(token.to_string());
                i += 1;
                continue;
            }

            if brand.is_none() && (is_possessive(token) || KNOWN_BRANDS.contains(&lower.as_str())) {
                brand = Some(token.to_string());
                i += 1;
                continue;
            }

            category_tokens.push(token);
            i += 1;
        }

        let category = if category_tokens.is_empty() {
            trimmed.to_string()
        } else {
            category_tokens.join(" ")
        };

        Ok(NormalizedGoal {
            original_text: trimmed.to_string(),
            quantity,
            quantity_string,
            unit_descriptor,
            brand,
            category,
            qualifiers,
        })
    }
}
