// src/work_item_ref.rs
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// "#123", "##123": one or more markers followed by the id digits.
static MARKED_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#+([0-9]+)").expect("marked reference pattern is valid"));

static DIGIT_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+").expect("digit run pattern is valid"));

/// Identifier of a work item in the tracking system. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(u32);

impl WorkItemId {
    pub fn new(value: u32) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{0}' is not a positive work item id")]
pub struct InvalidWorkItemId(pub String);

impl FromStr for WorkItemId {
    type Err = InvalidWorkItemId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(WorkItemId::new)
            .ok_or_else(|| InvalidWorkItemId(s.to_string()))
    }
}

/// Returns the id of the LAST `#id` reference in `text`.
///
/// Comment cells are free text; when a developer typed several references the
/// later one is taken as authoritative. Matches that are not a valid positive
/// id (zero, or too large) are ignored.
pub fn extract_reference(text: &str) -> Option<WorkItemId> {
    MARKED_REFERENCE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|digits| digits.as_str().parse::<WorkItemId>().ok())
        .last()
}

/// Fallback used when cross-referencing a known id set: every run of digits
/// is a candidate, and the last candidate that belongs to `known` wins.
pub fn extract_known_reference(text: &str, known: &HashSet<WorkItemId>) -> Option<WorkItemId> {
    let mut found = None;
    for digits in DIGIT_RUN.find_iter(text) {
        if let Ok(id) = digits.as_str().parse::<WorkItemId>() {
            if known.contains(&id) {
                found = Some(id);
            }
        }
    }
    found
}
