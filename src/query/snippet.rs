// SPDX-License-Identifier: MIT OR Apache-2.0

//! Highlighted snippets for substring-scan hits
//!
//! Full-text hits get their snippets from FTS5 `snippet()`. Substring hits are
//! windowed here, measured in characters so CJK text is never split mid-char.

use regex::{Regex, RegexBuilder};

pub const MARK_OPEN: &str = "<mark>";
pub const MARK_CLOSE: &str = "</mark>";
pub const ELLIPSIS: &str = "...";

const SNIPPET_CHARS: usize = 64;
const CONTEXT_BEFORE: usize = 20;
const CONTEXT_AFTER: usize = 44;

/// Case-insensitive alternation of the keywords, longest first.
pub fn highlight_regex(keywords: &[&str]) -> Option<Regex> {
    let mut sorted: Vec<&str> = keywords
        .iter()
        .copied()
        .filter(|k| !k.is_empty())
        .collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    sorted.dedup();

    let pattern = sorted
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

fn highlight(text: &str, re: &Regex) -> String {
    re.replace_all(text, |caps: &regex::Captures| {
        format!("{MARK_OPEN}{}{MARK_CLOSE}", &caps[0])
    })
    .to_string()
}

/// Snippet around the first keyword occurrence in `text`.
pub fn manual_snippet(text: &str, re: Option<&Regex>) -> String {
    let Some(re) = re else {
        return text.to_string();
    };
    if text.is_empty() {
        return String::new();
    }

    let total = text.chars().count();
    if total <= SNIPPET_CHARS {
        return highlight(text, re);
    }

    let Some(found) = re.find(text) else {
        let head: String = text.chars().take(SNIPPET_CHARS).collect();
        return format!("{head}{ELLIPSIS}");
    };

    let match_start = text[..found.start()].chars().count();
    let match_len = found.as_str().chars().count();
    let start = match_start.saturating_sub(CONTEXT_BEFORE);
    let end = (match_start + match_len + CONTEXT_AFTER).min(total);
    let window: String = text.chars().skip(start).take(end - start).collect();

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.push_str(&highlight(&window, re));
    if end < total {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_highlighted_whole() {
        let re = highlight_regex(&["login"]);
        assert_eq!(
            manual_snippet("Login Check", re.as_ref()),
            "<mark>Login</mark> Check"
        );
    }

    #[test]
    fn long_text_is_windowed_around_match() {
        let text = format!("{}needle{}", "a".repeat(50), "b".repeat(100));
        let re = highlight_regex(&["needle"]);
        let snippet = manual_snippet(&text, re.as_ref());
        let expected = format!(
            "...{}<mark>needle</mark>{}...",
            "a".repeat(20),
            "b".repeat(44)
        );
        assert_eq!(snippet, expected);
    }

    #[test]
    fn missing_match_returns_head() {
        let text = "x".repeat(100);
        let re = highlight_regex(&["zzz"]);
        assert_eq!(
            manual_snippet(&text, re.as_ref()),
            format!("{}...", "x".repeat(64))
        );
    }

    #[test]
    fn windows_count_characters_not_bytes() {
        let text = format!("{}登录{}", "测".repeat(30), "试".repeat(60));
        let re = highlight_regex(&["登录"]);
        let snippet = manual_snippet(&text, re.as_ref());
        assert!(snippet.starts_with("..."));
        assert!(snippet.contains("<mark>登录</mark>"));
        let inner = snippet
            .trim_start_matches(ELLIPSIS)
            .trim_end_matches(ELLIPSIS)
            .replace(MARK_OPEN, "")
            .replace(MARK_CLOSE, "");
        assert_eq!(inner.chars().count(), 20 + 2 + 44);
    }

    #[test]
    fn match_at_start_has_no_leading_ellipsis() {
        let text = format!("needle{}", "c".repeat(100));
        let re = highlight_regex(&["needle"]);
        let snippet = manual_snippet(&text, re.as_ref());
        assert!(snippet.starts_with("<mark>needle</mark>"));
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn empty_keywords_leave_text_alone() {
        assert!(highlight_regex(&[]).is_none());
        assert_eq!(manual_snippet("plain", None), "plain");
    }
}
