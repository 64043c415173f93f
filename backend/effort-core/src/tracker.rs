// src/tracker.rs
//
// Boundary to the remote work-item tracking system. The engine only needs
// three calls; they are slow and remote, and are neither retried nor cached.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, info};

use crate::work_item_ref::WorkItemId;

// --- Define Specific Tracker Error Type ---
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error")]
    UrlParse(#[from] url::ParseError),

    #[error("Rate limit exceeded (Status 429)")]
    RateLimitExceeded,

    // Use this for non-429 API errors
    #[error("Tracker API error: Status={status}, Message='{message}'")]
    ApiError { status: StatusCode, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// --- Snapshots ---

/// Read-only view of a work item as the tracker reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemSnapshot {
    pub id: WorkItemId,
    pub title: String,
    pub state: String,
    pub estimated_effort: Option<f64>,
    pub remaining_work: Option<f64>,
    /// Children through parent-to-child hierarchy links.
    #[serde(default)]
    pub child_ids: Vec<WorkItemId>,
}

impl WorkItemSnapshot {
    pub fn new(id: WorkItemId, title: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            state: state.into(),
            estimated_effort: None,
            remaining_work: None,
            child_ids: Vec::new(),
        }
    }

    pub fn with_estimate(mut self, effort: f64) -> Self {
        self.estimated_effort = Some(effort);
        self
    }

    pub fn with_remaining_work(mut self, remaining: f64) -> Self {
        self.remaining_work = Some(remaining);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = WorkItemId>) -> Self {
        self.child_ids = children.into_iter().collect();
        self
    }

    /// Estimate as a decimal; absent or unrepresentable estimates count as 0.
    pub fn estimate(&self) -> Decimal {
        self.estimated_effort
            .and_then(Decimal::from_f64)
            .unwrap_or(Decimal::ZERO)
    }
}

/// A live work item with the remaining work of its children rolled up.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveWorkItem {
    pub snapshot: WorkItemSnapshot,
    pub remaining_work_rollup: Decimal,
}

// --- Tracker trait ---

#[async_trait]
pub trait WorkItemTracker: Send + Sync {
    /// Live bugs and backlog items of the configured project, in priority order.
    async fn query_live_work_items(&self) -> Result<Vec<WorkItemSnapshot>, TrackerError>;

    /// Remaining work of each given item; items without the field are absent.
    async fn fetch_remaining_work(
        &self,
        ids: &[WorkItemId],
    ) -> Result<HashMap<WorkItemId, f64>, TrackerError>;

    /// Snapshots for the given ids. Unknown ids are missing from the result;
    /// callers that need every id must check.
    async fn fetch_snapshots(&self, ids: &[WorkItemId])
        -> Result<Vec<WorkItemSnapshot>, TrackerError>;
}

/// Queries the live items and rolls the children's remaining work onto each
/// parent. Items without children get a rollup of 0.
pub async fn live_work_items_with_rollup<T: WorkItemTracker + ?Sized>(
    tracker: &T,
) -> Result<Vec<LiveWorkItem>, TrackerError> {
    let live = tracker.query_live_work_items().await?;
    info!("Tracker returned {} live work item(s)", live.len());

    let mut live_items = Vec::with_capacity(live.len());
    for snapshot in live {
        let mut rollup = Decimal::ZERO;
        if !snapshot.child_ids.is_empty() {
            debug!(
                "Fetching remaining work of {} child item(s) of {}",
                snapshot.child_ids.len(),
                snapshot.id
            );
            let remaining = tracker.fetch_remaining_work(&snapshot.child_ids).await?;
            rollup = remaining
                .values()
                .filter_map(|r| Decimal::from_f64(*r))
                .sum();
        }
        live_items.push(LiveWorkItem {
            snapshot,
            remaining_work_rollup: rollup,
        });
    }
    Ok(live_items)
}

// --- In-memory tracker ---

/// Tracker backed by a fixed set of snapshots. `live` lists the ids the live
/// query returns, in order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTracker {
    items: HashMap<WorkItemId, WorkItemSnapshot>,
    live: Vec<WorkItemId>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item that is returned by the live query.
    pub fn with_live_item(mut self, snapshot: WorkItemSnapshot) -> Self {
        self.live.push(snapshot.id);
        self.items.insert(snapshot.id, snapshot);
        self
    }

    /// Adds an item only reachable by id (closed items, child tasks).
    pub fn with_item(mut self, snapshot: WorkItemSnapshot) -> Self {
        self.items.insert(snapshot.id, snapshot);
        self
    }
}

#[async_trait]
impl WorkItemTracker for InMemoryTracker {
    async fn query_live_work_items(&self) -> Result<Vec<WorkItemSnapshot>, TrackerError> {
        Ok(self
            .live
            .iter()
            .filter_map(|id| self.items.get(id).cloned())
            .collect())
    }

    async fn fetch_remaining_work(
        &self,
        ids: &[WorkItemId],
    ) -> Result<HashMap<WorkItemId, f64>, TrackerError> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.items
                    .get(id)
                    .and_then(|item| item.remaining_work.map(|r| (*id, r)))
            })
            .collect())
    }

    async fn fetch_snapshots(
        &self,
        ids: &[WorkItemId],
    ) -> Result<Vec<WorkItemSnapshot>, TrackerError> {
        let unique: BTreeSet<WorkItemId> = ids.iter().copied().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| self.items.get(&id).cloned())
            .collect())
    }
}
