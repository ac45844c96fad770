// SPDX-License-Identifier: GPL-3.0-or-later

//! Simple wildcard glob matcher over `device.element` strings (§4.3,
//! glossary: "a simple wildcard pattern matching device.element
//! strings"). `*` matches any run of characters, `?` matches exactly
//! one. No full regex, matching the original's informal matcher.

pub fn matches(pattern: &str, text: &str) -> bool {
    match_bytes(pattern.as_bytes(), text.as_bytes())
}

fn match_bytes(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(b'*'), _) => {
            // Try consuming zero or more characters of text for this '*'.
            match_bytes(&pattern[1..], text)
                || (!text.is_empty() && match_bytes(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => match_bytes(&pattern[1..], &text[1..]),
        (Some(&p), Some(&t)) if p == t => match_bytes(&pattern[1..], &text[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::matches;

    #[test]
    fn exact_match() {
        assert!(matches("joy.ax0", "joy.ax0"));
        assert!(!matches("joy.ax0", "joy.ax1"));
    }

    #[test]
    fn star_wildcard() {
        assert!(matches("joy.*", "joy.ax0"));
        assert!(matches("*.button", "joy.button"));
        assert!(matches("*", "anything.at.all"));
    }

    #[test]
    fn question_wildcard() {
        assert!(matches("ax?", "ax0"));
        assert!(!matches("ax?", "ax10"));
    }
}
