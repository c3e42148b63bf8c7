// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query term expansion for mixed CJK/Latin text
//!
//! CJK text has no spaces between words, so every keyword is expanded into
//! its CJK unigrams and adjacent bigrams plus any embedded Latin words.

use once_cell::sync::Lazy;
use regex::Regex;

static LATIN_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z]+").expect("valid latin word regex"));

/// True for CJK unified ideographs (base block and extension A).
pub fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}')
}

/// One whitespace-separated keyword and the terms that may match it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTerms {
    pub keyword: String,
    /// Verbatim keyword first, then unigrams, bigrams and Latin words
    pub terms: Vec<String>,
}

/// Expanded form of a raw query.
///
/// Keywords are ANDed together, the terms of one keyword are ORed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub keywords: Vec<KeywordTerms>,
}

impl QueryPlan {
    /// `None` for empty or whitespace-only queries.
    pub fn parse(raw: &str) -> Option<Self> {
        let keywords: Vec<KeywordTerms> = raw
            .split_whitespace()
            .map(|keyword| KeywordTerms {
                keyword: keyword.to_string(),
                terms: expand_keyword(keyword),
            })
            .collect();
        if keywords.is_empty() {
            None
        } else {
            Some(Self { keywords })
        }
    }

    pub fn is_multi_keyword(&self) -> bool {
        self.keywords.len() > 1
    }

    pub fn keyword_strs(&self) -> Vec<&str> {
        self.keywords.iter().map(|k| k.keyword.as_str()).collect()
    }

    /// FTS5 `MATCH` expression.
    pub fn fts_expression(&self) -> String {
        if self.is_multi_keyword() {
            self.keywords
                .iter()
                .map(|group| format!("({})", or_phrases(&group.terms)))
                .collect::<Vec<_>>()
                .join(" AND ")
        } else {
            or_phrases(&self.keywords[0].terms)
        }
    }
}

/// Expand one keyword into its search terms, de-duplicated in first-seen order.
pub fn expand_keyword(keyword: &str) -> Vec<String> {
    fn push(term: String, terms: &mut Vec<String>) {
        if !terms.iter().any(|existing| existing.eq_ignore_ascii_case(&term)) {
            terms.push(term);
        }
    }

    let mut terms: Vec<String> = Vec::new();
    push(keyword.to_string(), &mut terms);

    let cjk: Vec<char> = keyword.chars().filter(|c| is_cjk(*c)).collect();
    for c in &cjk {
        push(c.to_string(), &mut terms);
    }
    if cjk.len() >= 2 {
        for pair in cjk.windows(2) {
            push(pair.iter().collect(), &mut terms);
        }
    }

    for word in LATIN_WORD_RE.find_iter(keyword) {
        push(word.as_str().to_string(), &mut terms);
    }

    terms
}

fn or_phrases(terms: &[String]) -> String {
    terms
        .iter()
        .map(|term| fts_phrase(term))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Quote a term as an FTS5 phrase.
pub fn fts_phrase(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

/// `%term%` with LIKE wildcards escaped by `\`.
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
