// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parser module - Markdown test-case documents into records

pub mod testcase;

pub use testcase::{parse, record_id, TestCaseRecord};
