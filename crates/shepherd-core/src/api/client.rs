//! Document database client for the Firestore REST API.
//!
//! This module provides the `ApiClient` struct for listing, creating and
//! patching documents in the church's collections.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::models::{District, Event, Family, Member, Ministry, Registration, Visitor};

use super::firestore::{self, Document, ListDocumentsResponse};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Base URL for the Firestore REST API
pub const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

/// HTTP request timeout in seconds
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Documents requested per page when listing a collection
const PAGE_SIZE: u32 = 300;

/// Maximum number of retries for rate-limited (429) reads.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Collection names
pub mod collections {
    pub const MEMBERS: &str = "members";
    pub const FAMILIES: &str = "families";
    pub const DISTRICTS: &str = "districts";
    pub const MINISTRIES: &str = "ministries";
    pub const VISITORS: &str = "visitors";
    pub const EVENTS: &str = "events";
    pub const REGISTRATIONS: &str = "registrations";
}

/// Write access to the document database, as needed by message delivery
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    /// Create a document with a server-assigned id and return that id
    async fn create_document(&self, collection: &str, fields: Map<String, Value>) -> Result<String>;
}

/// Firestore client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    project_id: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new client for a project
    pub fn new(project_id: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: DEFAULT_FIRESTORE_URL.to_string(),
            project_id: project_id.into(),
            token: None,
        })
    }

    /// Point the client at another endpoint (e.g. the local emulator)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(), // Cheap clone, shares connection pool
            base_url: self.base_url.clone(),
            project_id: self.project_id.clone(),
            token: Some(token),
        }
    }

    /// Shared HTTP client, for the other service clients
    pub fn http(&self) -> &Client {
        &self.client
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            self.base_url, self.project_id, collection
        )
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        retry_rate_limited(url, move || async move {
            let response = self
                .client
                .get(url)
                .headers(self.auth_headers()?)
                .query(query)
                .send()
                .await
                .with_context(|| format!("Failed to send GET request to {}", url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => response
                    .json()
                    .await
                    .map(Some)
                    .with_context(|| format!("Failed to parse JSON response from {}", url)),
                None => Ok(None),
            }
        })
        .await
    }

    // ===== Generic document access =====

    /// List every document in a collection, following page tokens.
    /// Documents that fail to decode are skipped with a warning.
    pub async fn list_documents<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let url = self.collection_url(collection);
        let url = url.as_str();
        let records = collect_pages(move |page_token| {
            let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
            if let Some(token) = page_token {
                query.push(("pageToken", token));
            }
            async move { self.get::<ListDocumentsResponse>(url, &query).await }
        })
        .await?;

        debug!(collection = collection, count = records.len(), "Listed documents");
        Ok(records)
    }

    /// Fetch a single document by id
    pub async fn get_document<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<T> {
        let url = format!("{}/{}", self.collection_url(collection), id);
        let doc: Document = self.get(&url, &[]).await?;
        doc.into_record()
    }

    /// Update only the given fields of a document
    pub async fn patch_document(
        &self,
        collection: &str,
        id: &str,
        patch: &Map<String, Value>,
        timestamp_fields: &[&str],
    ) -> Result<()> {
        let url = format!("{}/{}", self.collection_url(collection), id);
        let (fields, mask) = firestore::encode_patch(patch, timestamp_fields);
        let query: Vec<(&str, &str)> = mask.iter().map(|path| ("updateMask.fieldPaths", path.as_str())).collect();

        let response = self
            .client
            .patch(&url)
            .headers(self.auth_headers()?)
            .query(&query)
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .with_context(|| format!("Failed to send PATCH request to {}", url))?;
        ApiError::check(response).await?;

        debug!(collection = collection, id = id, fields = ?mask, "Patched document");
        Ok(())
    }

    // ===== Data Fetching Methods =====

    pub async fn fetch_members(&self) -> Result<Vec<Member>> {
        let mut members: Vec<Member> = self.list_documents(collections::MEMBERS).await?;
        crate::models::sort_members(&mut members);
        Ok(members)
    }

    pub async fn fetch_families(&self) -> Result<Vec<Family>> {
        self.list_documents(collections::FAMILIES).await
    }

    pub async fn fetch_districts(&self) -> Result<Vec<District>> {
        self.list_documents(collections::DISTRICTS).await
    }

    pub async fn fetch_ministries(&self) -> Result<Vec<Ministry>> {
        self.list_documents(collections::MINISTRIES).await
    }

    pub async fn fetch_visitors(&self) -> Result<Vec<Visitor>> {
        self.list_documents(collections::VISITORS).await
    }

    pub async fn fetch_events(&self) -> Result<Vec<Event>> {
        self.list_documents(collections::EVENTS).await
    }

    pub async fn fetch_event(&self, event_id: &str) -> Result<Event> {
        self.get_document(collections::EVENTS, event_id).await
    }

    /// Store a registration and return its document id
    pub async fn create_registration(&self, registration: &Registration) -> Result<String> {
        let fields = firestore::encode_record(registration, &[])?;
        self.create_document(collections::REGISTRATIONS, fields).await
    }

    /// Move a member into a district
    pub async fn set_member_district(&self, member_id: &str, district_id: &str) -> Result<()> {
        let mut patch = Map::new();
        patch.insert("districtId".to_string(), json!(district_id));
        self.patch_document(collections::MEMBERS, member_id, &patch, &[]).await
    }
}

/// Run `attempt` until it yields a value. `Ok(None)` means rate limited:
/// back off (1s, 2s, 4s) and retry, giving up after the retries run out.
async fn retry_rate_limited<T, F, Fut>(url: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut retries = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        if let Some(value) = attempt().await? {
            return Ok(value);
        }
        retries += 1;
        if retries > MAX_RATE_LIMIT_RETRIES {
            return Err(ApiError::RateLimited.into());
        }
        warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms *= 2;
    }
}

/// Fetch pages until the next-page token is missing or empty, decoding every
/// document. Documents that fail to decode are skipped with a warning.
async fn collect_pages<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ListDocumentsResponse>>,
{
    let mut records = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = fetch_page(page_token.take()).await?;
        for doc in page.documents {
            let name = doc.name.clone();
            match doc.into_record::<T>() {
                Ok(record) => records.push(record),
                Err(e) => warn!(document = %name, error = %e, "Skipping undecodable document"),
            }
        }

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => return Ok(records),
        }
    }
}

#[async_trait]
impl DocumentWriter for ApiClient {
    /// Single attempt; callers decide whether a failure is retried
    async fn create_document(&self, collection: &str, fields: Map<String, Value>) -> Result<String> {
        let url = self.collection_url(collection);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .with_context(|| format!("Failed to send POST request to {}", url))?;

        let response = ApiError::check(response).await?;
        let doc: Document = response
            .json()
            .await
            .with_context(|| format!("Failed to parse created document from {}", url))?;
        Ok(doc.id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_url() {
        let api = ApiClient::new("grace-church").unwrap();
        assert_eq!(
            api.collection_url("members"),
            "https://firestore.googleapis.com/v1/projects/grace-church/databases/(default)/documents/members"
        );
        let emulator = api.with_base_url("http://localhost:8080/v1/");
        assert_eq!(
            emulator.collection_url("events"),
            "http://localhost:8080/v1/projects/grace-church/databases/(default)/documents/events"
        );
    }

    #[test]
    fn test_auth_headers() {
        let api = ApiClient::new("p").unwrap();
        assert!(api.auth_headers().unwrap().get(header::AUTHORIZATION).is_none());
        let authed = api.with_token("abc".to_string());
        assert_eq!(
            authed.auth_headers().unwrap().get(header::AUTHORIZATION).unwrap(),
            "Bearer abc"
        );
    }

    #[test]
    fn test_parse_list_response() {
        let json = r#"{
            "documents": [{
                "name": "projects/p/databases/(default)/documents/members/m1",
                "fields": {
                    "firstName": {"stringValue": "Ruth"},
                    "lastName": {"stringValue": "Moab"},
                    "email": {"stringValue": "ruth@example.org"},
                    "ministryIds": {"arrayValue": {"values": [{"stringValue": "choir"}]}},
                    "address": {"mapValue": {"fields": {"postalCode": {"stringValue": "97301"}}}}
                },
                "createTime": "2026-01-01T00:00:00Z"
            }],
            "nextPageToken": "abc"
        }"#;
        let page: ListDocumentsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
        let member: Member = page.documents.into_iter().next().unwrap().into_record().unwrap();
        assert_eq!(member.id, "m1");
        assert_eq!(member.email_address(), Some("ruth@example.org"));
        assert!(member.in_ministry("choir"));
        assert_eq!(member.zip5().as_deref(), Some("97301"));
    }

    #[test]
    fn test_parse_empty_list_response() {
        let page: ListDocumentsResponse = serde_json::from_str("{}").unwrap();
        assert!(page.documents.is_empty());
        assert!(page.next_page_token.is_none());
    }

    fn page(json: &str) -> ListDocumentsResponse {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_reads_back_off_then_give_up() {
        let start = tokio::time::Instant::now();
        let mut attempts = Vec::new();

        let result: Result<u32> = retry_rate_limited("members", || {
            attempts.push(start.elapsed().as_millis());
            async { Ok(None) }
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::RateLimited)));
        // One initial attempt and three retries after 1s, 2s and 4s
        assert_eq!(attempts, vec![0, 1000, 3000, 7000]);
        assert_eq!(start.elapsed(), Duration::from_millis(7000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_read_recovers() {
        let start = tokio::time::Instant::now();
        let mut calls = 0;

        let value = retry_rate_limited("members", || {
            calls += 1;
            let outcome = if calls < 3 { None } else { Some("ok") };
            async move { Ok(outcome) }
        })
        .await
        .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls, 3);
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<u32> = retry_rate_limited("members", || {
            calls += 1;
            async { Err(ApiError::AccessDenied("members".into()).into()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_collect_pages_follows_tokens_and_skips_bad_documents() {
        let mut pages = std::collections::VecDeque::from(vec![
            page(
                r#"{"documents": [
                    {"name": "p/members/m1", "fields": {"firstName": {"stringValue": "Ruth"}}}
                ], "nextPageToken": "second"}"#,
            ),
            page(
                r#"{"documents": [
                    {"name": "p/members/bad", "fields": {"firstName": {"booleanValue": true}}},
                    {"name": "p/members/m2", "fields": {"firstName": {"stringValue": "Naomi"}}}
                ], "nextPageToken": ""}"#,
            ),
            page(r#"{"documents": [{"name": "p/members/never"}]}"#),
        ]);
        let mut tokens = Vec::new();

        let members: Vec<Member> = collect_pages(|token| {
            tokens.push(token);
            let next = pages.pop_front().ok_or_else(|| anyhow::anyhow!("no more pages"));
            async move { next }
        })
        .await
        .unwrap();

        let ids: Vec<&str> = members.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(tokens, vec![None, Some("second".to_string())]);
        assert_eq!(pages.len(), 1);
    }

    #[tokio::test]
    async fn test_collect_pages_propagates_fetch_errors() {
        let result: Result<Vec<Member>> =
            collect_pages(|_| async { Err(ApiError::Unauthorized.into()) }).await;
        assert!(result.is_err());
    }
}
