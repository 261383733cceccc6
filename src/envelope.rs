//! Relay envelope and direct-mode correlation
//!
//! Every message relayed to the operator carries a metadata block appended to
//! its text or caption:
//!
//! ```text
//! <original content>
//!
//! =========================
//! contact_id: 4821
//! name: Alice Smith
//! handle: @alice
//! ```
//!
//! In direct mode this block is the only way to tell which contact an operator
//! reply is meant for: the reply's parent message is parsed back with
//! [`extract_contact_id`] and [`extract_display_name`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::contact::Contact;

pub const SEPARATOR: &str = "=========================";
pub const ID_LABEL: &str = "contact_id";
pub const NAME_LABEL: &str = "name";
pub const HANDLE_LABEL: &str = "handle";

/// Platform limits for message text and media captions
pub const MAX_TEXT_CHARS: usize = 4096;
pub const MAX_CAPTION_CHARS: usize = 1024;

static ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^contact_id:[ \t]*(\d+)").expect("valid contact id pattern")
});
static ID_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^contact_id:[ \t]*(\d+)[ \t]*$").expect("valid contact id line pattern")
});
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^name:[ \t]*([^\n]+)").expect("valid name pattern"));
static HANDLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^handle:[ \t]*@?([^\n]+)").expect("valid handle pattern"));

/// The metadata block describing `contact`, including the leading blank line
pub fn metadata_block(contact: &Contact) -> String {
    let mut block = format!("\n\n{}\n{}: {}", SEPARATOR, ID_LABEL, contact.id);
    if let Some(name) = contact.full_name() {
        block.push_str(&format!("\n{}: {}", NAME_LABEL, single_line(&name)));
    }
    if let Some(username) = contact.username.as_deref().filter(|u| !u.is_empty()) {
        block.push_str(&format!("\n{}: @{}", HANDLE_LABEL, single_line(username)));
    }
    block
}

/// Contact-supplied values must stay on their own line and never spell out
/// the separator.
fn single_line(value: &str) -> String {
    let mut value: String = value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    while value.contains(SEPARATOR) {
        value = value.replace(SEPARATOR, "");
    }
    value.trim().to_string()
}

/// Append the metadata block to `content`
pub fn wrap(content: &str, contact: &Contact) -> String {
    format!("{}{}", content, metadata_block(contact))
}

/// Like [`wrap`], but shortens `content` so the result fits in `limit`
/// characters. The metadata block itself is never cut.
pub fn wrap_within(content: &str, contact: &Contact, limit: usize) -> String {
    let block = metadata_block(contact);
    let room = limit.saturating_sub(block.chars().count());
    if content.chars().count() <= room {
        return format!("{}{}", content, block);
    }

    let mut shortened: String = content.chars().take(room.saturating_sub(1)).collect();
    shortened.push('…');
    shortened.push_str(&block);
    shortened
}

/// Metadata lines: everything after the last line consisting of exactly the
/// separator. `None` when the text carries no such line.
fn metadata_region(text: &str) -> Option<&str> {
    text.match_indices(SEPARATOR).collect::<Vec<_>>().into_iter().rev().find_map(|(idx, _)| {
        let line_start = idx == 0 || text[..idx].ends_with('\n');
        let rest = &text[idx + SEPARATOR.len()..];
        let rest = rest.strip_prefix('\r').unwrap_or(rest);
        if !line_start {
            return None;
        }
        if rest.is_empty() {
            Some(rest)
        } else {
            rest.strip_prefix('\n')
        }
    })
}

/// Contact id of a relayed message.
///
/// When a metadata block is present the id must be its first line; otherwise
/// the first `contact_id: <digits>` line anywhere in the text counts.
pub fn extract_contact_id(text: &str) -> Option<i64> {
    let caps = match metadata_region(text) {
        Some(region) => ID_LINE_RE.captures(region.lines().next()?),
        None => ID_RE.captures(text),
    };
    caps.and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// `name:` value, else `@` + `handle:` value
pub fn extract_display_name(text: &str) -> Option<String> {
    let region = metadata_region(text).unwrap_or(text);

    let name = NAME_RE
        .captures(region)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|name| !name.is_empty());
    if let Some(name) = name {
        return Some(name.to_string());
    }

    HANDLE_RE
        .captures(region)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|handle| !handle.is_empty())
        .map(|handle| format!("@{}", handle))
}
