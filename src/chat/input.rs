//! Parsing of inbound chat payloads and user replies.

use serde_json::Value;

/// Longest inbound text considered; the rest is dropped
pub const MAX_TEXT_LENGTH: usize = 1000;

pub const OPTION_LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A user message worth handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Conversation identity (the sender's address)
    pub from: String,
    /// Trimmed text, at most [`MAX_TEXT_LENGTH`] characters
    pub text: String,
    pub message_id: Option<String>,
}

impl InboundMessage {
    /// Lowercased text for command matching
    pub fn command(&self) -> String {
        self.text.to_lowercase()
    }
}

fn non_empty_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pull a user message out of a webhook body.
///
/// Returns `None` for the channel's own messages, group messages, status
/// updates and anything without a sender or text.
pub fn parse_inbound(body: &Value) -> Option<InboundMessage> {
    let obj = body.as_object()?;

    if obj.get("isOwner").and_then(Value::as_bool) == Some(true)
        || obj.get("isGroup").and_then(Value::as_bool) == Some(true)
        || body.pointer("/message/isOwner").and_then(Value::as_bool) == Some(true)
    {
        return None;
    }

    for field in ["eventType", "statusType"] {
        if let Some(kind) = obj.get(field).and_then(Value::as_str) {
            if !kind.is_empty() && kind != "message" {
                return None;
            }
        }
    }

    let from = obj
        .get("from")
        .and_then(non_empty_str)
        .or_else(|| obj.get("waId").and_then(non_empty_str))?;

    let raw = obj
        .get("text")
        .and_then(non_empty_str)
        .or_else(|| obj.get("message").and_then(non_empty_str))
        .or_else(|| body.pointer("/message/text").and_then(non_empty_str))
        .or_else(|| body.pointer("/listReply/title").and_then(non_empty_str))
        .or_else(|| body.pointer("/buttonReply/text").and_then(non_empty_str))?;
    let text: String = raw.chars().take(MAX_TEXT_LENGTH).collect();
    let text = text.trim().to_string();
    if text.is_empty() {
        return None;
    }

    let message_id = ["id", "whatsappMessageId", "messageId"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(non_empty_str));

    Some(InboundMessage {
        from,
        text,
        message_id,
    })
}

/// Resolve a reply against offered options by 1-based number or exact text
/// (case-insensitive, trimmed).
pub fn pick_option(input: &str, options: &[String]) -> Option<String> {
    let needle = input.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    if needle.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = needle.parse::<usize>() {
            if (1..=options.len()).contains(&n) {
                return Some(options[n - 1].clone());
            }
        }
    }

    options
        .iter()
        .find(|o| o.trim().to_lowercase() == needle)
        .cloned()
}

pub fn option_letter(index: usize) -> Option<char> {
    OPTION_LETTERS.get(index).map(|b| *b as char)
}

/// Normalize a quiz reply to an option letter.
///
/// Accepts a letter within range, a 1-based number, or the exact text of an
/// option.
pub fn parse_answer(input: &str, options: &[String]) -> Option<char> {
    let value = input.trim();
    if value.is_empty() {
        return None;
    }

    let upper = value.to_ascii_uppercase();
    if upper.len() == 1 {
        let c = upper.as_bytes()[0];
        if c.is_ascii_uppercase() {
            let idx = (c - b'A') as usize;
            if idx < options.len() {
                return option_letter(idx);
            }
        }
    }

    if value.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = value.parse::<usize>() {
            if (1..=options.len()).contains(&n) {
                return option_letter(n - 1);
            }
        }
    }

    let lowered = value.to_lowercase();
    options
        .iter()
        .position(|o| o.trim().to_lowercase() == lowered)
        .and_then(option_letter)
}

pub fn is_valid_email(text: &str) -> bool {
    let text = text.trim();
    if text.chars().any(char::is_whitespace) || text.matches('@').count() != 1 {
        return false;
    }
    let Some((local, domain)) = text.split_once('@') else {
        return false;
    };
    if local.is_empty() {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

pub fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// The last ten digits of an address, used to match stored phone numbers
pub fn phone_key(from: &str) -> String {
    let digits = digits_only(from);
    let start = digits.len().saturating_sub(10);
    digits[start..].to_string()
}
