//! Remote drive API: paged folder listing and file download.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use lore_core::{ContentType, DriveConfig, LoreError, Result};

/// Mime type the drive uses for folders.
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// A file or folder entry in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub modified_time: String,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    /// Export format for native documents, which cannot be downloaded as-is.
    pub fn export_mime(&self) -> Option<&'static str> {
        match self.mime_type.as_str() {
            "application/vnd.google-apps.document" => Some("text/plain"),
            "application/vnd.google-apps.presentation" => Some("text/plain"),
            "application/vnd.google-apps.spreadsheet" => Some("text/csv"),
            _ => None,
        }
    }

    /// Content type of the bytes [`DriveClient::download`] returns.
    pub fn content_type(&self) -> ContentType {
        if let Some(export) = self.export_mime() {
            return ContentType::from_mime(export);
        }
        match ContentType::from_mime(&self.mime_type) {
            ContentType::Unknown => ContentType::from_path(&self.name),
            known => known,
        }
    }
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrivePage {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
}

/// Remote drive operations used by [`crate::DriveSync`].
#[async_trait]
pub trait DriveClient: Send + Sync {
    /// One page of the direct children of a folder.
    async fn list_children(&self, folder_id: &str, page_token: Option<&str>) -> Result<DrivePage>;

    /// File content, exported to text for native documents.
    async fn download(&self, file: &DriveFile) -> Result<Vec<u8>>;
}

/// Google Drive v3 REST client authenticated with a bearer token.
pub struct GoogleDriveClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
    page_size: u32,
    timeout: Duration,
}

impl GoogleDriveClient {
    pub fn new(
        api_base: &str,
        token: impl Into<String>,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoreError::sync(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            page_size: page_size.clamp(1, 1000),
            timeout,
        })
    }

    /// Client for the configured API, token read from `token_env`.
    pub fn from_config(config: &DriveConfig, timeout: Duration) -> Result<Self> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            LoreError::config(format!(
                "drive access token not found; export it as {}",
                config.token_env
            ))
        })?;
        Self::new(&config.api_base, token, config.page_size, timeout)
    }

    async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        operation: &str,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LoreError::Timeout {
                        operation: operation.to_string(),
                        millis: self.timeout.as_millis() as u64,
                    }
                } else {
                    LoreError::network(format!("{}: {}", operation, e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(LoreError::Remote {
            status: status.as_u16(),
            message: format!("{}: {}", operation, message),
        })
    }
}

#[async_trait]
impl DriveClient for GoogleDriveClient {
    async fn list_children(&self, folder_id: &str, page_token: Option<&str>) -> Result<DrivePage> {
        let q = format!("'{}' in parents and trashed = false", folder_id.replace('\'', "\\'"));
        let page_size = self.page_size.to_string();
        let mut query = vec![
            ("q", q.as_str()),
            ("fields", "nextPageToken, files(id, name, mimeType, modifiedTime)"),
            ("pageSize", page_size.as_str()),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let url = format!("{}/files", self.api_base);
        let response = self.get(&url, &query, "list drive folder").await?;
        let page: DrivePage = response
            .json()
            .await
            .map_err(|e| LoreError::sync(format!("Invalid drive listing: {}", e)))?;

        debug!(folder = %folder_id, files = page.files.len(), "Listed drive page");
        Ok(page)
    }

    async fn download(&self, file: &DriveFile) -> Result<Vec<u8>> {
        let response = match file.export_mime() {
            Some(mime) => {
                let url = format!("{}/files/{}/export", self.api_base, file.id);
                self.get(&url, &[("mimeType", mime)], "export drive file").await?
            }
            None => {
                let url = format!("{}/files/{}", self.api_base, file.id);
                self.get(&url, &[("alt", "media")], "download drive file").await?
            }
        };

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LoreError::network(format!("download drive file: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn file(id: &str, name: &str, mime: &str) -> DriveFile {
        DriveFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime.to_string(),
            modified_time: "2024-05-01T10:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(
            file("1", "Plan", "application/vnd.google-apps.document").content_type(),
            ContentType::PlainText
        );
        assert_eq!(
            file("2", "Budget", "application/vnd.google-apps.spreadsheet").content_type(),
            ContentType::Csv
        );
        assert_eq!(
            file("3", "notes.md", "application/octet-stream").content_type(),
            ContentType::Markdown
        );
        assert_eq!(file("4", "photo.png", "image/png").content_type(), ContentType::Unknown);
        assert!(file("5", "Sub", FOLDER_MIME).is_folder());
    }

    #[tokio::test]
    async fn test_list_children() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/files")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "'root1' in parents and trashed = false".into()),
                Matcher::UrlEncoded("pageSize".into(), "50".into()),
            ]))
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(
                r#"{"nextPageToken": "p2", "files": [
                    {"id": "a", "name": "a.txt", "mimeType": "text/plain",
                     "modifiedTime": "2024-01-01T00:00:00Z"},
                    {"id": "f", "name": "Sub", "mimeType": "application/vnd.google-apps.folder"}
                ]}"#,
            )
            .create_async()
            .await;

        let client =
            GoogleDriveClient::new(&server.url(), "secret", 50, Duration::from_secs(5)).unwrap();
        let page = client.list_children("root1", None).await.unwrap();

        mock.assert_async().await;
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));
        assert_eq!(page.files.len(), 2);
        assert!(page.files[1].is_folder());
        assert_eq!(page.files[1].modified_time, "");
    }

    #[tokio::test]
    async fn test_native_document_is_exported() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/files/doc1/export")
            .match_query(Matcher::UrlEncoded("mimeType".into(), "text/plain".into()))
            .with_status(200)
            .with_body("exported text")
            .create_async()
            .await;

        let client =
            GoogleDriveClient::new(&server.url(), "t", 100, Duration::from_secs(5)).unwrap();
        let bytes = client
            .download(&file("doc1", "Doc", "application/vnd.google-apps.document"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(bytes, b"exported text");
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/files/x")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("invalid credentials")
            .create_async()
            .await;

        let client =
            GoogleDriveClient::new(&server.url(), "bad", 100, Duration::from_secs(5)).unwrap();
        let err = client.download(&file("x", "x.txt", "text/plain")).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.error_code(), "REMOTE_ERROR");
    }
}
