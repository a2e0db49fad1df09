//! Reply shaping: schema extraction, paragraph trimming, output coercion

use super::{ResponseValue, TurnError, TurnRequest};
use crate::llm::Message;

pub const PARAGRAPH_DELIMITER: &str = "\n\n";

/// Requested output shape in text mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Number,
    Text,
}

impl OutputFormat {
    /// Case-insensitive; anything unrecognized (or absent) means text
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => OutputFormat::Json,
            Some(v) if v.eq_ignore_ascii_case("number") => OutputFormat::Number,
            _ => OutputFormat::Text,
        }
    }
}

/// Keep the paragraphs between the first and the last two.
///
/// Text with two or fewer paragraphs is returned unchanged, and so is text
/// whose kept range would come out empty.
pub fn trim_paragraphs(text: &str) -> String {
    let pieces: Vec<&str> = text.split(PARAGRAPH_DELIMITER).collect();
    if pieces.len() <= 2 {
        return text.to_string();
    }

    let middle = pieces[1..pieces.len() - 2].join(PARAGRAPH_DELIMITER);
    if middle.is_empty() {
        text.to_string()
    } else {
        middle
    }
}

/// Drop the first paragraph when there are more than two
pub fn trim_front(text: &str) -> String {
    let pieces: Vec<&str> = text.split(PARAGRAPH_DELIMITER).collect();
    if pieces.len() <= 2 {
        return text.to_string();
    }
    pieces[1..].join(PARAGRAPH_DELIMITER)
}

/// String-to-number conversion with the usual lenient rules.
///
/// Surrounding whitespace is ignored and blank text is zero. Accepts signed
/// decimals with optional fraction and exponent, signed `Infinity`, and
/// unsigned `0x`/`0o`/`0b` integers. Everything else is NaN.
pub fn coerce_number(text: &str) -> f64 {
    let s = text.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    if s.is_empty() {
        return 0.0;
    }

    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }

    let radix = match s.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return parse_radix_integer(s.get(2..).unwrap_or(""), radix);
    }

    if is_decimal_literal(s) {
        s.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

fn parse_radix_integer(digits: &str, radix: u32) -> f64 {
    if digits.is_empty() {
        return f64::NAN;
    }
    digits
        .chars()
        .try_fold(0.0_f64, |acc, c| {
            c.to_digit(radix).map(|d| acc * f64::from(radix) + f64::from(d))
        })
        .unwrap_or(f64::NAN)
}

/// `[+-]? (digits [. digits?] | . digits) ([eE] [+-]? digits)?`
fn is_decimal_literal(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }

    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut mantissa_digits = i - int_start;

    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        mantissa_digits += i - frac_start;
    }

    if mantissa_digits == 0 {
        return false;
    }

    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if i < bytes.len() && matches!(bytes[i], b'+' | b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }

    i == bytes.len()
}

/// Shape the top reply into the turn's response value
pub(super) fn format_reply(reply: &Message, request: &TurnRequest) -> Result<ResponseValue, TurnError> {
    if request.schema().is_some() {
        return extract_arguments(reply).map(ResponseValue::Json);
    }

    let text = reply
        .content
        .as_deref()
        .ok_or_else(|| TurnError::Extraction("Completion reply has no text content".to_string()))?;

    let text = if request.trim {
        trim_paragraphs(text)
    } else if request.trim_front {
        trim_front(text)
    } else {
        text.to_string()
    };

    Ok(match request.output_format() {
        OutputFormat::Json => ResponseValue::Json(serde_json::from_str(&text).map_err(TurnError::Format)?),
        OutputFormat::Number => ResponseValue::Number(coerce_number(&text)),
        OutputFormat::Text => ResponseValue::Text(text),
    })
}

fn extract_arguments(reply: &Message) -> Result<serde_json::Value, TurnError> {
    let call = reply
        .function_call
        .as_ref()
        .ok_or_else(|| TurnError::Extraction("Completion reply has no function call".to_string()))?;

    serde_json::from_str(&call.arguments).map_err(|e| {
        TurnError::Extraction(format!("Function call arguments are not valid JSON: {e}"))
    })
}
