// SPDX-License-Identifier: MIT OR Apache-2.0

//! Markdown test-case document parser
//!
//! A document is a sequence of headings (levels 1-3, treated alike), each
//! owning the text up to the next heading. A "Test Case Name" heading opens a
//! record, field headings fill the open record, anything else is ignored.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

static HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(#{1,3})[ \t]+(.+?)(?:[ \t]+#+)?[ \t]*$").expect("valid heading regex")
});

static THEMATIC_BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:-{3,}|\*{3,}|_{3,})$").expect("valid break regex"));

const NAME_LABELS: &[&str] = &["test case name", "测试用例名称", "用例名称"];
const NUMBER_LABELS: &[&str] = &["number", "no.", "编号", "用例编号"];
const PRECONDITION_LABELS: &[&str] = &["preconditions", "precondition", "前置条件", "前提条件"];
const STEP_LABELS: &[&str] = &[
    "steps",
    "operation steps",
    "test steps",
    "操作步骤",
    "测试步骤",
    "步骤",
];
const EXPECTED_LABELS: &[&str] = &[
    "expected results",
    "expected result",
    "预期结果",
    "期望结果",
];
const NOTE_LABELS: &[&str] = &["notes", "note", "remarks", "备注", "说明"];

/// One indexed test case.
///
/// Sections missing from the document are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseRecord {
    pub id: String,
    pub name: String,
    pub number: String,
    pub preconditions: String,
    pub steps: String,
    pub expected_results: String,
    pub notes: String,
    /// Project-relative, `/`-separated source path
    pub file_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Name,
    Number,
    Preconditions,
    Steps,
    ExpectedResults,
    Notes,
}

#[derive(Debug)]
struct Section {
    title: String,
    body: Vec<String>,
}

/// Stable record id for `(file_path, name)`.
pub fn record_id(file_path: &str, name: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(file_path.as_bytes());
    hasher.update(&[0]);
    hasher.update(name.as_bytes());
    short_hex(hasher)
}

/// Id for the 2nd+ record sharing a name inside one file.
fn repeated_record_id(file_path: &str, name: &str, ordinal: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(file_path.as_bytes());
    hasher.update(&[0]);
    hasher.update(name.as_bytes());
    hasher.update(&[0]);
    hasher.update(ordinal.to_string().as_bytes());
    short_hex(hasher)
}

fn short_hex(hasher: blake3::Hasher) -> String {
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..32].to_string()
}

/// Parse a document into records. Zero records is a valid result.
pub fn parse(file_path: &str, content: &str) -> Vec<TestCaseRecord> {
    let mut records: Vec<TestCaseRecord> = Vec::new();
    let mut current: Option<TestCaseRecord> = None;

    for section in split_sections(content) {
        let Some(label) = classify(&section.title) else {
            continue;
        };
        let text = section_text(&section.body);

        match label {
            Label::Name => {
                if let Some(done) = current.take() {
                    records.push(done);
                }
                current = Some(TestCaseRecord {
                    name: text,
                    file_path: file_path.to_string(),
                    ..TestCaseRecord::default()
                });
            }
            field => {
                if let Some(slot) = current.as_mut().and_then(|r| field_slot(r, field)) {
                    *slot = text;
                }
            }
        }
    }

    if let Some(done) = current.take() {
        records.push(done);
    }

    assign_ids(file_path, &mut records);
    records
}

fn field_slot(record: &mut TestCaseRecord, label: Label) -> Option<&mut String> {
    match label {
        Label::Name => None,
        Label::Number => Some(&mut record.number),
        Label::Preconditions => Some(&mut record.preconditions),
        Label::Steps => Some(&mut record.steps),
        Label::ExpectedResults => Some(&mut record.expected_results),
        Label::Notes => Some(&mut record.notes),
    }
}

fn assign_ids(file_path: &str, records: &mut [TestCaseRecord]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for record in records.iter_mut() {
        let count = seen.entry(record.name.clone()).or_insert(0);
        *count += 1;
        record.id = if *count == 1 {
            record_id(file_path, &record.name)
        } else {
            repeated_record_id(file_path, &record.name, *count)
        };
    }
}

fn split_sections(content: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut fence: Option<char> = None;

    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(marker) = fence_marker(trimmed) {
            match fence {
                Some(open) if open == marker => fence = None,
                None => fence = Some(marker),
                Some(_) => {}
            }
        } else if fence.is_none() {
            if let Some(caps) = HEADING_RE.captures(line) {
                sections.push(Section {
                    title: caps[2].trim().to_string(),
                    body: Vec::new(),
                });
                continue;
            }
        }

        if let Some(section) = sections.last_mut() {
            section.body.push(line.to_string());
        }
    }

    sections
}

fn fence_marker(line: &str) -> Option<char> {
    if line.starts_with("```") {
        Some('`')
    } else if line.starts_with("~~~") {
        Some('~')
    } else {
        None
    }
}

/// Section body with surrounding blank lines and trailing record separators removed.
fn section_text(body: &[String]) -> String {
    let mut lines: Vec<&str> = body.iter().map(String::as_str).collect();
    loop {
        match lines.last() {
            Some(last) if last.trim().is_empty() || THEMATIC_BREAK_RE.is_match(last.trim()) => {
                lines.pop();
            }
            _ => break,
        }
    }
    lines.join("\n").trim().to_string()
}

fn classify(title: &str) -> Option<Label> {
    let normalized = title
        .trim()
        .trim_end_matches([':', '：'])
        .trim()
        .to_lowercase();
    let normalized = normalized.as_str();

    let table: [(&[&str], Label); 6] = [
        (NAME_LABELS, Label::Name),
        (NUMBER_LABELS, Label::Number),
        (PRECONDITION_LABELS, Label::Preconditions),
        (STEP_LABELS, Label::Steps),
        (EXPECTED_LABELS, Label::ExpectedResults),
        (NOTE_LABELS, Label::Notes),
    ];
    table
        .iter()
        .find(|(labels, _)| labels.contains(&normalized))
        .map(|(_, label)| *label)
}
