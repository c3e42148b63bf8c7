// SPDX-License-Identifier: MIT OR Apache-2.0

//! caseindex - Incremental search index for Markdown test cases
//!
//! Shared modules for the caseindex CLI and for editors embedding the index.

pub mod config;
pub mod errors;
pub mod indexer;
pub mod manager;
pub mod parser;
pub mod query;

pub use config::IndexConfig;
pub use errors::{IndexError, Result};
pub use indexer::BuildReport;
pub use manager::{IndexManager, IndexStatistics};
pub use parser::TestCaseRecord;
pub use query::{FieldSnippets, MatchSource, SearchHit};
