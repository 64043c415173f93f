// src/azure_devops.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::tracker::{TrackerError, WorkItemSnapshot, WorkItemTracker};
use crate::work_item_ref::WorkItemId;

pub const API_VERSION: &str = "7.0";
/// Upper bound the work items endpoint accepts per call.
pub const MAX_IDS_PER_REQUEST: usize = 200;
pub const DEFAULT_PROJECT: &str = "India";

pub const FIELD_TITLE: &str = "System.Title";
pub const FIELD_STATE: &str = "System.State";
pub const FIELD_EFFORT: &str = "Microsoft.VSTS.Scheduling.Effort";
pub const FIELD_REMAINING_WORK: &str = "Microsoft.VSTS.Scheduling.RemainingWork";
pub const HIERARCHY_FORWARD: &str = "System.LinkTypes.Hierarchy-Forward";

const LIVE_TYPES: [&str; 2] = ["Bug", "Product Backlog Item"];
const LIVE_STATES: [&str; 3] = ["New", "Approved", "Committed"];

// --- Configuration ---

#[derive(Clone, Debug)]
pub struct AzureDevOpsConfig {
    /// Collection or organization URL, e.g. `https://dev.azure.com/acme`.
    pub organization_url: String,
    pub project: String,
    pub personal_access_token: String,
    pub timeout_secs: u64,
}

impl Default for AzureDevOpsConfig {
    fn default() -> Self {
        Self {
            organization_url: String::new(),
            project: DEFAULT_PROJECT.to_string(),
            personal_access_token: String::new(),
            timeout_secs: 30,
        }
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct WiqlRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiqlResponse {
    #[serde(default)]
    pub work_items: Vec<WorkItemReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemReference {
    pub id: u32,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemBatch {
    #[serde(default)]
    pub count: usize,
    /// Ids the tracker could not return come back as `null`.
    #[serde(default)]
    pub value: Vec<Option<RawWorkItem>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWorkItem {
    pub id: u32,
    #[serde(default)]
    pub fields: HashMap<String, Value>,
    #[serde(default)]
    pub relations: Option<Vec<WorkItemRelation>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemRelation {
    pub rel: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AzureErrorPayload {
    message: Option<String>,
}

impl RawWorkItem {
    fn text_field(&self, name: &str) -> String {
        match self.fields.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    fn number_field(&self, name: &str) -> Option<f64> {
        match self.fields.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Ids of hierarchy children, taken from the text after the last `/` of
    /// each forward link URL.
    pub fn child_ids(&self) -> Vec<WorkItemId> {
        self.relations
            .iter()
            .flatten()
            .filter(|relation| relation.rel == HIERARCHY_FORWARD)
            .filter_map(|relation| child_id_from_url(&relation.url))
            .collect()
    }

    /// `None` for id 0, which the tracker never hands out.
    pub fn into_snapshot(self) -> Option<WorkItemSnapshot> {
        let id = WorkItemId::new(self.id)?;
        Some(WorkItemSnapshot {
            id,
            title: self.text_field(FIELD_TITLE),
            state: self.text_field(FIELD_STATE),
            estimated_effort: self.number_field(FIELD_EFFORT),
            remaining_work: self.number_field(FIELD_REMAINING_WORK),
            child_ids: self.child_ids(),
        })
    }
}

pub fn child_id_from_url(url: &str) -> Option<WorkItemId> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse().ok())
}

/// WIQL selecting live bugs and backlog items of `project`, highest priority
/// first and most recently changed first within a priority.
pub fn live_items_query(project: &str) -> String {
    let types = LIVE_TYPES
        .iter()
        .map(|t| format!("[System.WorkItemType] = '{}'", t))
        .collect::<Vec<_>>()
        .join(" OR ");
    let states = LIVE_STATES
        .iter()
        .map(|s| format!("[System.State] = '{}'", s))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!(
        "SELECT [System.Id] FROM WorkItems \
         WHERE [System.TeamProject] = '{}' AND ({}) AND ({}) \
         ORDER BY [Microsoft.VSTS.Common.Priority] ASC, [System.ChangedDate] DESC",
        project.replace('\'', "''"),
        types,
        states
    )
}

/// `Basic` header value for a personal access token (empty user name).
pub fn basic_auth_value(personal_access_token: &str) -> String {
    format!(
        "Basic {}",
        BASE64_STANDARD.encode(format!(":{}", personal_access_token))
    )
}

// --- Client ---

#[derive(Clone)]
pub struct AzureDevOpsClient {
    base_url: Url,
    project: String,
    auth_header: String,
    http_client: Client,
}

impl AzureDevOpsClient {
    pub fn new(config: AzureDevOpsConfig) -> Result<Self, TrackerError> {
        if config.organization_url.trim().is_empty() {
            return Err(TrackerError::ConfigError(
                "Tracker URL is not set".to_string(),
            ));
        }
        if config.personal_access_token.is_empty() {
            return Err(TrackerError::ConfigError(
                "Tracker access token is not set".to_string(),
            ));
        }

        // A trailing slash keeps `join` from replacing the last path segment.
        let mut base = config.organization_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url,
            project: config.project,
            auth_header: basic_auth_value(&config.personal_access_token),
            http_client,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn endpoint(&self, path: &str) -> Result<Url, TrackerError> {
        let mut url = self.base_url.join(path)?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }

    fn build_request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header(AUTHORIZATION, &self.auth_header)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
    }

    async fn send_and_deserialize<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<T, TrackerError> {
        let request = request_builder.build().map_err(|e| {
            error!("Request build failed for '{}': {}", context_msg, e);
            TrackerError::Request(e)
        })?;
        let request_url = request.url().to_string();
        debug!("Sending request for '{}' to URL: {}", context_msg, request_url);

        let resp = self.http_client.execute(request).await.map_err(|e| {
            error!(
                "HTTP execution failed before receiving response for '{}' (URL: {}): {}",
                context_msg, request_url, e
            );
            TrackerError::Request(e)
        })?;

        let status = resp.status();
        info!(
            "Received response for '{}' (URL: {}): Status={}",
            context_msg, request_url, status
        );

        if status.is_success() {
            let bytes = resp.bytes().await?;
            return serde_json::from_slice::<T>(&bytes).map_err(|e| {
                error!(
                    "JSON deserialization failed for '{}' (URL: {}): {}",
                    context_msg, request_url, e
                );
                TrackerError::Json(e)
            });
        }

        let error_body = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
        error!(
            "API Error Response: Status={}, Body='{}' for URL: {}",
            status, error_body, request_url
        );
        Err(api_error(status, error_body))
    }

    async fn query_ids(&self) -> Result<Vec<WorkItemId>, TrackerError> {
        let query = live_items_query(&self.project);
        let url = self.endpoint(&format!("{}/_apis/wit/wiql", self.project))?;
        let request = self
            .build_request(Method::POST, url)
            .json(&WiqlRequest { query: &query });
        let response: WiqlResponse = self.send_and_deserialize(request, "WIQL query").await?;
        Ok(response
            .work_items
            .into_iter()
            .filter_map(|item| WorkItemId::new(item.id))
            .collect())
    }

    async fn fetch_batch(&self, ids: &[WorkItemId]) -> Result<Vec<RawWorkItem>, TrackerError> {
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let mut url = self.endpoint("_apis/wit/workitems")?;
        url.query_pairs_mut()
            .append_pair("ids", &joined)
            .append_pair("$expand", "relations")
            // Deleted or inaccessible ids come back as null entries.
            .append_pair("errorPolicy", "omit");
        let request = self.build_request(Method::GET, url);
        let batch: WorkItemBatch = self
            .send_and_deserialize(request, "work item batch")
            .await?;
        Ok(batch.value.into_iter().flatten().collect())
    }

    async fn fetch_items(&self, ids: &[WorkItemId]) -> Result<Vec<RawWorkItem>, TrackerError> {
        let mut items = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_REQUEST) {
            items.extend(self.fetch_batch(chunk).await?);
        }
        Ok(items)
    }
}

fn api_error(status: StatusCode, error_body: String) -> TrackerError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("Rate limit exceeded: {}", error_body);
        return TrackerError::RateLimitExceeded;
    }
    let message = serde_json::from_str::<AzureErrorPayload>(&error_body)
        .ok()
        .and_then(|payload| payload.message)
        .unwrap_or(error_body);
    TrackerError::ApiError { status, message }
}

/// Keeps the order of `ids`, dropping ids the tracker did not return.
fn order_like(ids: &[WorkItemId], items: Vec<RawWorkItem>) -> Vec<WorkItemSnapshot> {
    let mut by_id: HashMap<WorkItemId, WorkItemSnapshot> = items
        .into_iter()
        .filter_map(RawWorkItem::into_snapshot)
        .map(|snapshot| (snapshot.id, snapshot))
        .collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

fn dedup_ids(ids: &[WorkItemId]) -> Vec<WorkItemId> {
    let mut seen = std::collections::HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[async_trait]
impl WorkItemTracker for AzureDevOpsClient {
    async fn query_live_work_items(&self) -> Result<Vec<WorkItemSnapshot>, TrackerError> {
        let ids = self.query_ids().await?;
        info!(
            "WIQL returned {} live work item(s) in project {}",
            ids.len(),
            self.project
        );
        let items = self.fetch_items(&ids).await?;
        Ok(order_like(&ids, items))
    }

    async fn fetch_remaining_work(
        &self,
        ids: &[WorkItemId],
    ) -> Result<HashMap<WorkItemId, f64>, TrackerError> {
        let ids = dedup_ids(ids);
        let items = self.fetch_items(&ids).await?;
        Ok(items
            .into_iter()
            .filter_map(RawWorkItem::into_snapshot)
            .filter_map(|s| s.remaining_work.map(|r| (s.id, r)))
            .collect())
    }

    async fn fetch_snapshots(
        &self,
        ids: &[WorkItemId],
    ) -> Result<Vec<WorkItemSnapshot>, TrackerError> {
        let ids = dedup_ids(ids);
        let items = self.fetch_items(&ids).await?;
        Ok(order_like(&ids, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(value: u32) -> WorkItemId {
        WorkItemId::new(value).unwrap()
    }

    fn sample_batch() -> WorkItemBatch {
        serde_json::from_value(json!({
            "count": 2,
            "value": [
                {
                    "id": 501,
                    "rev": 7,
                    "fields": {
                        "System.Title": "Import timesheets",
                        "System.State": "Committed",
                        "Microsoft.VSTS.Scheduling.Effort": 13.0,
                        "Microsoft.VSTS.Scheduling.RemainingWork": 2
                    },
                    "relations": [
                        { "rel": "System.LinkTypes.Hierarchy-Forward", "url": "https://dev.azure.com/acme/_apis/wit/workItems/601", "attributes": {} },
                        { "rel": "System.LinkTypes.Hierarchy-Reverse", "url": "https://dev.azure.com/acme/_apis/wit/workItems/400" },
                        { "rel": "System.LinkTypes.Hierarchy-Forward", "url": "https://dev.azure.com/acme/_apis/wit/workItems/602" },
                        { "rel": "ArtifactLink", "url": "vstfs:///Git/Commit/abc" }
                    ]
                },
                {
                    "id": 502,
                    "fields": {
                        "System.Title": "Fix export",
                        "System.State": "New"
                    }
                },
                null
            ]
        }))
        .unwrap()
    }

    #[test]
    fn raw_items_map_to_snapshots() {
        let batch = sample_batch();
        assert_eq!(batch.count, 2);
        let snapshots: Vec<_> = batch
            .value
            .into_iter()
            .flatten()
            .filter_map(RawWorkItem::into_snapshot)
            .collect();

        assert_eq!(snapshots[0].id, id(501));
        assert_eq!(snapshots[0].title, "Import timesheets");
        assert_eq!(snapshots[0].state, "Committed");
        assert_eq!(snapshots[0].estimated_effort, Some(13.0));
        assert_eq!(snapshots[0].remaining_work, Some(2.0));
        assert_eq!(snapshots[0].child_ids, vec![id(601), id(602)]);

        assert_eq!(snapshots[1].estimated_effort, None);
        assert_eq!(snapshots[1].remaining_work, None);
        assert!(snapshots[1].child_ids.is_empty());
    }

    #[test]
    fn results_follow_requested_order() {
        let items = sample_batch().value.into_iter().flatten().collect();
        let ordered = order_like(&[id(502), id(999), id(501)], items);
        let ids: Vec<_> = ordered.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![id(502), id(501)]);
    }

    #[test]
    fn wiql_response_parses() {
        let response: WiqlResponse = serde_json::from_value(json!({
            "queryType": "flat",
            "asOf": "2018-03-30T10:00:00Z",
            "workItems": [ { "id": 7, "url": "https://x/7" }, { "id": 3 } ]
        }))
        .unwrap();
        let ids: Vec<u32> = response.work_items.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![7, 3]);
    }

    #[test]
    fn child_ids_come_from_the_last_url_segment() {
        assert_eq!(child_id_from_url("https://a/b/workItems/42"), Some(id(42)));
        assert_eq!(child_id_from_url("https://a/b/workItems/42/"), Some(id(42)));
        assert_eq!(child_id_from_url("https://a/b/workItems/abc"), None);
    }

    #[test]
    fn query_filters_type_state_and_project() {
        let query = live_items_query("India");
        assert!(query.contains("[System.TeamProject] = 'India'"));
        assert!(query.contains("[System.WorkItemType] = 'Bug' OR [System.WorkItemType] = 'Product Backlog Item'"));
        assert!(query.contains("[System.State] = 'New' OR [System.State] = 'Approved' OR [System.State] = 'Committed'"));
        assert!(query.ends_with(
            "ORDER BY [Microsoft.VSTS.Common.Priority] ASC, [System.ChangedDate] DESC"
        ));
        assert!(live_items_query("O'Neil").contains("'O''Neil'"));
    }

    #[test]
    fn basic_auth_uses_empty_user_name() {
        // base64(":secret")
        assert_eq!(basic_auth_value("secret"), "Basic OnNlY3JldA==");
    }

    #[test]
    fn error_statuses_map_to_tracker_errors() {
        assert!(matches!(
            api_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            TrackerError::RateLimitExceeded
        ));
        match api_error(
            StatusCode::BAD_REQUEST,
            r#"{"$id":"1","message":"TF51005: The query references a field that does not exist."}"#
                .to_string(),
        ) {
            TrackerError::ApiError { status, message } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert!(message.starts_with("TF51005"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match api_error(StatusCode::UNAUTHORIZED, "denied".to_string()) {
            TrackerError::ApiError { message, .. } => assert_eq!(message, "denied"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn client_requires_url_and_token() {
        let missing_url = AzureDevOpsClient::new(AzureDevOpsConfig {
            personal_access_token: "pat".into(),
            ..Default::default()
        });
        assert!(matches!(missing_url, Err(TrackerError::ConfigError(_))));

        let client = AzureDevOpsClient::new(AzureDevOpsConfig {
            organization_url: "https://dev.azure.com/acme".into(),
            personal_access_token: "pat".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.project(), "India");
        let url = client.endpoint("India/_apis/wit/wiql").unwrap();
        assert_eq!(
            url.as_str(),
            "https://dev.azure.com/acme/India/_apis/wit/wiql?api-version=7.0"
        );
    }
}
