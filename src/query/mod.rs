// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query module - term expansion, search and snippets

pub mod search;
pub mod snippet;
pub mod terms;

pub use search::{FieldSnippets, MatchSource, SearchEngine, SearchHit, SearchResults};
