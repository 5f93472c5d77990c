//! Graph-style REST backend
//!
//! Implements both collaborator traits over HTTP with a bearer token:
//! the inbox listing, the user directory lookup and the user photo body.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{DirectoryBackend, MailBackend};
use crate::config::AppConfig;
use crate::types::error::SyncError;
use crate::types::{PhotoResource, RawMessage};

const MESSAGE_FIELDS: &str =
    "id,conversationId,subject,from,bodyPreview,isRead,hasAttachments,receivedDateTime,webLink";

/// `{"value": [...]}` collection envelope
#[derive(Debug, Deserialize)]
struct Collection<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct DirectoryUser {
    id: String,
}

pub struct GraphBackend {
    client: Client,
    base_url: Url,
    max_messages: u32,
}

impl GraphBackend {
    pub fn new(base_url: &str, access_token: &str, max_messages: u32) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::Config(format!("Invalid backend URL {}: {}", base_url, e)))?;

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| SyncError::Config(format!("Invalid access token: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            max_messages,
        })
    }

    /// Build from the `[backend]` and `[sync]` config sections
    pub fn from_config(config: &AppConfig) -> Result<Self, SyncError> {
        let token = config
            .backend
            .access_token
            .as_ref()
            .ok_or_else(|| SyncError::Config("No access token configured".to_string()))?
            .resolve()?;

        Self::new(&config.backend.base_url, &token, config.sync.max_messages)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Config(format!("Backend URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a GET and map auth/HTTP failures; 404 is returned as `None`
    async fn get(&self, url: Url, query: &[(&str, &str)]) -> Result<Option<Response>, SyncError> {
        debug!("GET {}", url);

        let response = self.client.get(url.clone()).query(query).send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            warn!("Backend rejected credentials for {}", url.path());
            return Err(SyncError::AuthExpired(format!("{} returned {}", url.path(), status)));
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!(
                "{} returned {}: {}",
                url.path(),
                status,
                body
            )));
        }

        Ok(Some(response))
    }
}

#[async_trait]
impl MailBackend for GraphBackend {
    async fn fetch_inbox_messages(&self) -> Result<Vec<RawMessage>, SyncError> {
        let url = self.endpoint(&["me", "mailFolders", "inbox", "messages"])?;
        let top = self.max_messages.to_string();
        let query = [
            ("$top", top.as_str()),
            ("$select", MESSAGE_FIELDS),
            ("$orderby", "receivedDateTime desc"),
        ];

        let response = self
            .get(url, &query)
            .await?
            .ok_or_else(|| SyncError::FetchFailed("Inbox folder not found".to_string()))?;

        let collection: Collection<RawMessage> = response.json().await?;
        debug!("Fetched {} inbox messages", collection.value.len());
        Ok(collection.value)
    }
}

#[async_trait]
impl DirectoryBackend for GraphBackend {
    async fn find_user_id_by_email(&self, email: &str) -> Result<Option<String>, SyncError> {
        let url = self.endpoint(&["users"])?;
        let filter = format!("mail eq '{}'", email.replace('\'', "''"));
        let query = [("$filter", filter.as_str()), ("$select", "id")];

        let Some(response) = self.get(url, &query).await? else {
            return Ok(None);
        };
        let users: Collection<DirectoryUser> = response.json().await?;
        Ok(users.value.into_iter().next().map(|u| u.id))
    }

    async fn fetch_user_photo(&self, user_id: &str) -> Result<Option<PhotoResource>, SyncError> {
        let url = self.endpoint(&["users", user_id, "photo", "$value"])?;

        let Some(response) = self.get(url, &[]).await? else {
            return Ok(None);
        };
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response.bytes().await?;

        if bytes.is_empty() {
            return Ok(None);
        }

        Ok(Some(PhotoResource {
            content_type,
            bytes: bytes.to_vec(),
        }))
    }
}
