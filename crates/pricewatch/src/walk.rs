//! Generic traversal over schema-less extraction documents.
//!
//! Extracted documents have no fixed shape, so every heuristic that looks at
//! them goes through this module instead of indexing known fields.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// A scalar value found in the document tree.
#[derive(Debug, Clone, Copy)]
pub struct Leaf<'a> {
    /// Nearest enclosing object key (array items inherit their array's key).
    pub key: Option<&'a str>,
    pub value: &'a Value,
    /// Approximate character offset of the value in compact serialized form.
    pub offset: usize,
}

/// A price-like number found in the document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceValue {
    pub value: f64,
    pub offset: usize,
}

/// Collect every scalar leaf in depth-first document order.
pub fn leaves(doc: &Value) -> Vec<Leaf<'_>> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    collect(doc, None, &mut offset, &mut out);
    out
}

fn collect<'a>(value: &'a Value, key: Option<&'a str>, offset: &mut usize, out: &mut Vec<Leaf<'a>>) {
    match value {
        Value::Object(map) => {
            *offset += 1;
            for (k, v) in map {
                // "key": plus the trailing separator
                *offset += k.len() + 3;
                collect(v, Some(k.as_str()), offset, out);
                *offset += 1;
            }
            *offset += 1;
        }
        Value::Array(items) => {
            *offset += 1;
            for v in items {
                collect(v, key, offset, out);
                *offset += 1;
            }
            *offset += 1;
        }
        scalar => {
            out.push(Leaf {
                key,
                value: scalar,
                offset: *offset,
            });
            *offset += scalar_len(scalar);
        }
    }
}

fn scalar_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len() + 2,
        Value::Number(n) => n.to_string().len(),
        Value::Bool(true) | Value::Null => 4,
        Value::Bool(false) => 5,
        Value::Object(_) | Value::Array(_) => 0,
    }
}

/// Every object key in the document.
pub fn keys(doc: &Value) -> Vec<&str> {
    let mut out = Vec::new();
    let mut stack = vec![doc];
    while let Some(v) = stack.pop() {
        match v {
            Value::Object(map) => {
                out.extend(map.keys().map(String::as_str));
                stack.extend(map.values().rev());
            }
            Value::Array(items) => stack.extend(items.iter().rev()),
            _ => {}
        }
    }
    out
}

/// Lowercased keys and string values, the vocabulary the signal checks search.
pub fn terms(doc: &Value) -> Vec<String> {
    let mut out: Vec<String> = keys(doc).into_iter().map(str::to_lowercase).collect();
    out.extend(
        leaves(doc)
            .into_iter()
            .filter_map(|leaf| leaf.value.as_str())
            .map(str::to_lowercase),
    );
    out
}

/// Whether a term list mentions `needle` anywhere (substring, case-insensitive).
pub fn mentions(terms: &[String], needle: &str) -> bool {
    let needle = needle.to_lowercase();
    terms.iter().any(|t| t.contains(&needle))
}

/// Serialized size of the document in bytes.
pub fn serialized_len(doc: &Value) -> usize {
    serde_json::to_string(doc).map(|s| s.len()).unwrap_or(0)
}

const PRICE_KEY_MARKERS: &[&str] = &[
    "price", "cost", "amount", "fee", "charge", "monthly", "yearly", "annual", "usd", "eur",
    "gbp", "per_", "per-",
];

fn is_price_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    PRICE_KEY_MARKERS.iter().any(|m| key.contains(m))
}

fn currency_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"-?\s*[$\u{20AC}\u{00A3}\u{00A5}]\s*-?\s*\d(?:[\d.,]*\d)?")
            .expect("currency regex is valid")
    })
}

fn code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)-?\s*(\d(?:[\d.,]*\d)?)\s*(?:usd|eur|gbp)\b")
            .expect("currency code regex is valid")
    })
}

/// Find every price-like number in the document.
///
/// Permissive by intent: numbers under price-ish keys, plus strings that read
/// as currency amounts anywhere in the tree. False positives are expected;
/// callers treat the result as a diagnostic signal only.
pub fn price_values(doc: &Value) -> Vec<PriceValue> {
    let mut out = Vec::new();
    for leaf in leaves(doc) {
        let price_key = leaf.key.map(is_price_key).unwrap_or(false);
        match leaf.value {
            Value::Number(n) if price_key => {
                if let Some(v) = n.as_f64().filter(|v| v.is_finite()) {
                    out.push(PriceValue {
                        value: v,
                        offset: leaf.offset,
                    });
                }
            }
            Value::String(s) => {
                let found = prices_in_text(s);
                if found.is_empty() && price_key {
                    if let Ok(v) = s.trim().parse::<f64>() {
                        if v.is_finite() {
                            out.push(PriceValue {
                                value: v,
                                offset: leaf.offset,
                            });
                        }
                    }
                }
                out.extend(found.into_iter().map(|value| PriceValue {
                    value,
                    offset: leaf.offset,
                }));
            }
            _ => {}
        }
    }
    out
}

/// Currency amounts mentioned in free text (`$20`, `€5,50/mo`, `-$3`, `12 USD`).
pub fn prices_in_text(text: &str) -> Vec<f64> {
    let mut out = Vec::new();
    for m in currency_regex().find_iter(text) {
        if let Some(v) = parse_price_text(m.as_str()) {
            out.push(signed(text, m.start(), m.as_str(), v));
        }
    }
    for caps in code_regex().captures_iter(text) {
        let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if let Some(v) = parse_price_text(number.as_str()) {
            out.push(signed(text, whole.start(), whole.as_str(), v));
        }
    }
    out
}

// A dash right after a digit is a range ("10-20"), not a sign.
fn signed(text: &str, start: usize, matched: &str, value: f64) -> f64 {
    let after_digit = text[..start]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_digit());
    if matched.contains('-') && !after_digit {
        -value
    } else {
        value
    }
}

/// Parse a price string, stripping currency symbols, commas, and whitespace.
/// Returns `None` if the string does not contain a valid number.
pub fn parse_price_text(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    // 1.234,56 vs 1,234.56: the last separator is the decimal one.
    let normalized = if cleaned.contains(',') && cleaned.contains('.') {
        if cleaned.rfind(',') > cleaned.rfind('.') {
            cleaned.replace('.', "").replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else if cleaned.contains(',') {
        let after_comma = cleaned.split(',').next_back().unwrap_or("");
        if after_comma.len() <= 2 {
            cleaned.replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else {
        cleaned
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}
