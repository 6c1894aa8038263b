//! Crowdin v2 API client: project/string listing, translation presence
//! checks, and uploads.
//!
//! List endpoints return pages wrapped in a `{"data": [{"data": {...}}]}`
//! envelope; pagination walks offsets in steps of 500 until an empty page.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

const PAGE_SIZE: u32 = 500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One page of the Crowdin list envelope.
#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<Wrapped<T>>,
}

/// Every list entry nests the payload under its own `data` key. Entries
/// with a null payload show up on the translations endpoint.
#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub target_languages: Vec<Language>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Language {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceString {
    pub id: u64,
    pub identifier: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Translation {
    pub id: u64,
    pub text: String,
}

/// One automated QA finding flagged against an existing translation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaIssue {
    pub id: u64,
    pub string_id: u64,
    pub language_id: String,
    pub text: String,
    #[serde(default)]
    pub validation_description: String,
}

/// Result of a translation upload. Rejections are reported, not fatal;
/// Crowdin refuses duplicates of an identical existing translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Created,
    Rejected { status: u16, body: String },
}

pub struct CrowdinClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CrowdinClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn fetch_all<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut offset = 0u32;
        loop {
            let page: Page<T> = self
                .client
                .get(url)
                .bearer_auth(&self.api_key)
                .query(&[("offset", offset), ("limit", PAGE_SIZE)])
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
                .with_context(|| format!("Failed to reach {url}"))?
                .error_for_status()
                .with_context(|| format!("Request to {url} rejected"))?
                .json()
                .await
                .with_context(|| format!("Failed to parse page from {url}"))?;

            if page.data.is_empty() {
                break;
            }
            items.extend(page.data.into_iter().filter_map(|entry| entry.data));
            offset += PAGE_SIZE;
        }
        Ok(items)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.fetch_all(&format!("{}/projects", self.base_url)).await
    }

    pub async fn list_strings(&self, project_id: u64) -> Result<Vec<SourceString>> {
        self.fetch_all(&format!("{}/projects/{project_id}/strings", self.base_url))
            .await
    }

    pub async fn list_qa_issues(&self, project_id: u64) -> Result<Vec<QaIssue>> {
        self.fetch_all(&format!("{}/projects/{project_id}/qa-checks", self.base_url))
            .await
    }

    /// Fetch the existing translation of a string in one language, if any.
    ///
    /// Transport and parse failures are errors, not "no translation":
    /// callers must be able to tell an absent translation apart from a
    /// failed check.
    pub async fn get_translation(
        &self,
        project_id: u64,
        string_id: u64,
        language_id: &str,
    ) -> Result<Option<Translation>> {
        let url = format!("{}/projects/{project_id}/translations", self.base_url);
        let page: Page<Translation> = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("stringId", string_id.to_string()),
                ("languageId", language_id.to_string()),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?
            .error_for_status()
            .with_context(|| format!("Translation check for string {string_id} rejected"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse translation check for string {string_id}"))?;

        Ok(page.data.into_iter().next().and_then(|entry| entry.data))
    }

    /// Whether a string still lacks a translation in the given language.
    pub async fn needs_translation(
        &self,
        project_id: u64,
        string_id: u64,
        language_id: &str,
    ) -> Result<bool> {
        Ok(self
            .get_translation(project_id, string_id, language_id)
            .await?
            .is_none())
    }

    pub async fn upload_translation(
        &self,
        project_id: u64,
        string_id: u64,
        language_id: &str,
        text: &str,
    ) -> Result<UploadOutcome> {
        let url = format!("{}/projects/{project_id}/translations", self.base_url);
        let payload = serde_json::json!({
            "stringId": string_id,
            "languageId": language_id,
            "text": text,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        let status = response.status();
        if status.as_u16() == 201 {
            info!("Translation uploaded successfully");
            return Ok(UploadOutcome::Created);
        }

        let body = response.text().await.unwrap_or_default();
        warn!("Upload rejected (status {status}): {body}");
        Ok(UploadOutcome::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> CrowdinClient {
        CrowdinClient::new(reqwest::Client::new(), base_url, "test-key")
    }

    fn project_entry(id: u64, name: &str) -> serde_json::Value {
        serde_json::json!({
            "data": {
                "id": id,
                "name": name,
                "targetLanguages": [
                    {"id": "fr", "name": "French"},
                    {"id": "de", "name": "German"}
                ]
            }
        })
    }

    fn string_entry(id: u64, text: &str) -> serde_json::Value {
        serde_json::json!({
            "data": {"id": id, "identifier": format!("key-{id}"), "text": text}
        })
    }

    // ==================== Listing Tests ====================

    #[tokio::test]
    async fn test_list_projects_single_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects"))
            .and(query_param("offset", "0"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [project_entry(1, "My App")]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects"))
            .and(query_param("offset", "500"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})),
            )
            .mount(&server)
            .await;

        let projects = client(&server.uri()).list_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "My App");
        assert_eq!(projects[0].target_languages[0].id, "fr");
        assert_eq!(projects[0].target_languages[1].name, "German");
    }

    #[tokio::test]
    async fn test_list_strings_walks_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/7/strings"))
            .and(query_param("offset", "0"))
            .and(query_param("limit", "500"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [string_entry(11, "Hello"), string_entry(12, "Goodbye")]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/7/strings"))
            .and(query_param("offset", "500"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [string_entry(13, "Save {count} files")]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/7/strings"))
            .and(query_param("offset", "1000"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let strings = client(&server.uri()).list_strings(7).await.unwrap();
        assert_eq!(strings.len(), 3);
        assert_eq!(strings[2].text, "Save {count} files");
        assert_eq!(strings[0].identifier, "key-11");
    }

    #[tokio::test]
    async fn test_list_projects_auth_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(client(&server.uri()).list_projects().await.is_err());
    }

    // ==================== Translation Check Tests ====================

    #[tokio::test]
    async fn test_needs_translation_when_no_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/1/translations"))
            .and(query_param("stringId", "11"))
            .and(query_param("languageId", "fr"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})),
            )
            .mount(&server)
            .await;

        assert!(client(&server.uri())
            .needs_translation(1, 11, "fr")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_needs_translation_when_entry_payload_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/1/translations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"data": null}]
            })))
            .mount(&server)
            .await;

        assert!(client(&server.uri())
            .needs_translation(1, 11, "fr")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_get_translation_returns_existing_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/1/translations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"data": {"id": 99, "text": "Bonjour"}}]
            })))
            .mount(&server)
            .await;

        let c = client(&server.uri());
        let translation = c.get_translation(1, 11, "fr").await.unwrap().unwrap();
        assert_eq!(translation.id, 99);
        assert_eq!(translation.text, "Bonjour");
        assert!(!c.needs_translation(1, 11, "fr").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_server_error_is_an_error() {
        // A failed check must never read as "already translated"
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/1/translations"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(client(&server.uri()).needs_translation(1, 11, "fr").await.is_err());
    }

    #[tokio::test]
    async fn test_check_malformed_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/1/translations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"message": "invalid stringId"}
            })))
            .mount(&server)
            .await;

        assert!(client(&server.uri()).needs_translation(1, 11, "fr").await.is_err());
    }

    // ==================== QA Issue Tests ====================

    #[tokio::test]
    async fn test_list_qa_issues_parses_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/3/qa-checks"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"data": {
                    "id": 41,
                    "stringId": 11,
                    "languageId": "fr",
                    "text": "Bonjour",
                    "validationDescription": "Missing placeholder"
                }}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/3/qa-checks"))
            .and(query_param("offset", "500"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})),
            )
            .mount(&server)
            .await;

        let issues = client(&server.uri()).list_qa_issues(3).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, 41);
        assert_eq!(issues[0].string_id, 11);
        assert_eq!(issues[0].language_id, "fr");
        assert_eq!(issues[0].validation_description, "Missing placeholder");
    }

    // ==================== Upload Tests ====================

    #[tokio::test]
    async fn test_upload_created() {
        let server = MockServer::start().await;
        let expected = serde_json::json!({
            "stringId": 11,
            "languageId": "fr",
            "text": "Bonjour"
        });
        Mock::given(method("POST"))
            .and(path("/projects/1/translations"))
            .and(body_json_string(expected.to_string()))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": {"id": 500, "text": "Bonjour"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server.uri())
            .upload_translation(1, 11, "fr", "Bonjour")
            .await
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Created);
    }

    #[tokio::test]
    async fn test_upload_identical_translation_rejected_without_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/1/translations"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "errors": [{"error": {"key": "text", "errors": [
                    {"code": "identical", "message": "An identical translation already exists"}
                ]}}]
            })))
            .mount(&server)
            .await;

        let outcome = client(&server.uri())
            .upload_translation(1, 11, "fr", "Bonjour")
            .await
            .unwrap();
        match outcome {
            UploadOutcome::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("identical translation"));
            }
            UploadOutcome::Created => panic!("Upload should have been rejected"),
        }
    }
}
