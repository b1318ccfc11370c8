//! Cloud disk REST client.
//!
//! Downloads are a two-step dance: the API hands out a short-lived direct
//! link, the bytes come from a second request against that link.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{FileStore, RemoteFile, RemoteStoreError};

const LISTING_PAGE_LIMIT: u32 = 1000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// REST client for the cloud disk API.
#[derive(Debug, Clone)]
pub struct DiskClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    #[serde(rename = "_embedded")]
    embedded: Option<EmbeddedItems>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedItems {
    items: Vec<ResourceItem>,
}

#[derive(Debug, Deserialize)]
struct ResourceItem {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadLink {
    href: String,
}

impl DiskClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, RemoteStoreError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        // A trailing slash keeps Url::join from eating the last path segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Ok(Self {
            http,
            base_url: Url::parse(&normalized)?,
            token: token.into(),
        })
    }

    fn auth_value(&self) -> String {
        format!("OAuth {}", self.token)
    }

    fn endpoint(&self, segment: &str) -> Result<Url, RemoteStoreError> {
        Ok(self.base_url.join(segment)?)
    }

    async fn read_api_error(
        response: reqwest::Response,
        operation: &'static str,
    ) -> RemoteStoreError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        RemoteStoreError::Api {
            status,
            operation,
            message,
        }
    }
}

#[async_trait]
impl FileStore for DiskClient {
    async fn check_token(&self) -> Result<bool, RemoteStoreError> {
        let url = self.endpoint("")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_value())
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::read_api_error(response, "check_token").await),
        }
    }

    async fn list(&self, folder: &str) -> Result<Vec<RemoteFile>, RemoteStoreError> {
        let url = self.endpoint("resources")?;
        let limit = LISTING_PAGE_LIMIT.to_string();
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_value())
            .query(&[
                ("path", folder),
                ("limit", limit.as_str()),
                ("fields", "_embedded.items.name,_embedded.items.path,_embedded.items.type,_embedded.items.sha256"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::read_api_error(response, "list").await);
        }
        let body: ResourceResponse = response.json().await?;
        let items = body.embedded.map(|e| e.items).unwrap_or_default();

        let mut files = Vec::with_capacity(items.len());
        for item in items {
            if item.kind != "file" {
                continue;
            }
            let Some(sha256) = item.sha256 else {
                return Err(RemoteStoreError::MalformedResponse {
                    details: format!("file entry '{}' is missing its sha256", item.name),
                });
            };
            files.push(RemoteFile {
                name: item.name,
                path: item.path,
                content_hash: sha256,
            });
        }
        debug!(folder, count = files.len(), "listed remote folder");
        Ok(files)
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, RemoteStoreError> {
        let url = self.endpoint("resources/download")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_value())
            .query(&[("path", path)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::read_api_error(response, "download_link").await);
        }
        let link: DownloadLink = response.json().await?;

        let response = self
            .http
            .get(&link.href)
            .header("Authorization", self.auth_value())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::read_api_error(response, "download").await);
        }
        let bytes = response.bytes().await?;
        debug!(path, bytes = bytes.len(), "downloaded remote file");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> DiskClient {
        DiskClient::new(&server.uri(), "test-token").expect("client")
    }

    #[tokio::test]
    async fn check_token_accepts_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("Authorization", "OAuth test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_space": 1
            })))
            .mount(&server)
            .await;

        assert!(client_for(&server).check_token().await.unwrap());
    }

    #[tokio::test]
    async fn check_token_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(!client_for(&server).check_token().await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_files_with_hashes_and_skips_directories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources"))
            .and(query_param("path", "extracts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "_embedded": {
                    "items": [
                        {
                            "name": "orders.csv",
                            "path": "disk:/extracts/orders.csv",
                            "type": "file",
                            "sha256": "aa11"
                        },
                        {
                            "name": "archive",
                            "path": "disk:/extracts/archive",
                            "type": "dir"
                        }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let files = client_for(&server).list("extracts").await.unwrap();
        assert_eq!(
            files,
            vec![RemoteFile {
                name: "orders.csv".to_string(),
                path: "disk:/extracts/orders.csv".to_string(),
                content_hash: "aa11".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn list_rejects_file_entry_without_hash() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "_embedded": {
                    "items": [
                        { "name": "orders.csv", "path": "disk:/orders.csv", "type": "file" }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).list("extracts").await.unwrap_err();
        assert!(matches!(err, RemoteStoreError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn download_follows_temporary_link() {
        let server = MockServer::start().await;
        let href = format!("{}/direct/orders.csv", server.uri());
        Mock::given(method("GET"))
            .and(path("/resources/download"))
            .and(query_param("path", "disk:/extracts/orders.csv"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "href": href })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/direct/orders.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"id;total\n1;5".to_vec()))
            .mount(&server)
            .await;

        let bytes = client_for(&server)
            .download("disk:/extracts/orders.csv")
            .await
            .unwrap();
        assert_eq!(bytes, b"id;total\n1;5".to_vec());
    }

    #[tokio::test]
    async fn download_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/download"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .download("disk:/missing.csv")
            .await
            .unwrap_err();
        match err {
            RemoteStoreError::Api { status, .. } => assert_eq!(status, 404),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn csv_filter_is_case_insensitive() {
        let file = RemoteFile {
            name: "Orders.CSV".to_string(),
            path: "disk:/Orders.CSV".to_string(),
            content_hash: "aa".to_string(),
        };
        assert!(file.is_csv());
        let other = RemoteFile {
            name: "readme.txt".to_string(),
            path: "disk:/readme.txt".to_string(),
            content_hash: "bb".to_string(),
        };
        assert!(!other.is_csv());
    }
}
