// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test-case search
//!
//! Full-text matches come first. When they are too few (or the full-text
//! query fails) a substring scan runs as well and its extra hits are appended.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::indexer::store::IndexStore;
use crate::parser::TestCaseRecord;
use crate::query::snippet::{highlight_regex, manual_snippet};
use crate::query::terms::QueryPlan;

/// Highlighted excerpt of every searchable field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSnippets {
    pub name: String,
    pub number: String,
    pub preconditions: String,
    pub steps: String,
    pub expected_results: String,
    pub notes: String,
}

impl FieldSnippets {
    fn from_record(record: &TestCaseRecord, re: Option<&Regex>) -> Self {
        Self {
            name: manual_snippet(&record.name, re),
            number: manual_snippet(&record.number, re),
            preconditions: manual_snippet(&record.preconditions, re),
            steps: manual_snippet(&record.steps, re),
            expected_results: manual_snippet(&record.expected_results, re),
            notes: manual_snippet(&record.notes, re),
        }
    }
}

/// Which retrieval path produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    FullText,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: TestCaseRecord,
    pub snippets: FieldSnippets,
    pub source: MatchSource,
}

/// Hits of one search, plus whether the full-text index reported corruption.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub index_corrupted: bool,
}

pub struct SearchEngine<'a> {
    store: &'a IndexStore,
    fallback_threshold: usize,
}

impl<'a> SearchEngine<'a> {
    pub fn new(store: &'a IndexStore, fallback_threshold: usize) -> Self {
        Self {
            store,
            fallback_threshold,
        }
    }

    /// Search records. Never fails: storage errors degrade to fewer hits.
    pub fn search(&self, raw: &str, limit: Option<usize>) -> Vec<SearchHit> {
        self.run(raw, limit).hits
    }

    /// Like [`search`](Self::search), but also reports a corrupted full-text
    /// index so the caller can rebuild it.
    pub fn run(&self, raw: &str, limit: Option<usize>) -> SearchResults {
        let Some(plan) = QueryPlan::parse(raw) else {
            return SearchResults::default();
        };

        let mut index_corrupted = false;
        let (primary, primary_failed) = match self.store.full_text_search(&plan) {
            Ok(hits) => (hits, false),
            Err(e) => {
                index_corrupted = e.is_corruption();
                warn!(query = raw, error = %e, "full-text search failed, using substring scan");
                (Vec::new(), true)
            }
        };

        let fallback = if primary_failed || primary.len() < self.fallback_threshold {
            match self.store.substring_search(&plan) {
                Ok(records) => records,
                Err(e) => {
                    warn!(query = raw, error = %e, "substring search failed");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let highlighter = highlight_regex(&plan.keyword_strs());
        let full_text = primary.len();
        let mut hits = merge_hits(primary, fallback, highlighter.as_ref());
        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        debug!(
            query = raw,
            full_text,
            total = hits.len(),
            "search finished"
        );
        SearchResults {
            hits,
            index_corrupted,
        }
    }
}

/// Full-text hits in rank order, then substring-only hits, each id once.
fn merge_hits(
    primary: Vec<(TestCaseRecord, FieldSnippets)>,
    fallback: Vec<TestCaseRecord>,
    highlighter: Option<&Regex>,
) -> Vec<SearchHit> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut hits = Vec::with_capacity(primary.len() + fallback.len());

    for (record, snippets) in primary {
        if seen.insert(record.id.clone()) {
            hits.push(SearchHit {
                record,
                snippets,
                source: MatchSource::FullText,
            });
        }
    }

    for record in fallback {
        if seen.insert(record.id.clone()) {
            let snippets = FieldSnippets::from_record(&record, highlighter);
            hits.push(SearchHit {
                record,
                snippets,
                source: MatchSource::Substring,
            });
        }
    }

    hits
}
