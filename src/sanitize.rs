//! Sanitization helpers for untrusted external text.
//!
//! Error strings from wallets and RPC endpoints and result references from the
//! confirmation stream are attacker-controllable; everything rendered into a
//! notification passes through here first.

const ELLIPSIS: char = '…';

/// Strips control characters, collapses whitespace runs and caps the length
/// (in chars) of external text destined for display.
pub fn display_text(raw: &str, max_chars: usize) -> String {
    let mut cleaned = String::with_capacity(raw.len().min(max_chars.saturating_mul(4)));
    let mut last_was_space = true;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                cleaned.push(' ');
                last_was_space = true;
            }
            continue;
        }
        if ch.is_control() {
            continue;
        }
        cleaned.push(ch);
        last_was_space = false;
    }
    let trimmed = cleaned.trim_end();

    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = trimmed.chars().take(keep).collect();
    out.push(ELLIPSIS);
    out
}

/// Abbreviates a 0x-prefixed hex identifier as `0x1234…abcd`.
pub fn short_hex(full: &str) -> String {
    let chars: Vec<char> = full.chars().collect();
    if chars.len() <= 12 {
        return full.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{ELLIPSIS}{tail}")
}
