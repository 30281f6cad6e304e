//! REST client for the content, business and user collections
//!
//! Queries provide cache tags and mutations invalidate them, so a successful
//! write marks the matching collection stale the same way a pushed change
//! event does.

pub mod models;

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::{CacheTag, InvalidationSink, QueryCache};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

pub use models::{
    ApiResponse, Business, BusinessInput, BusinessQuery, BusinessRef, Content, ContentQuery,
    ContentType, ContentUpdate, NewContent, PageMeta, SocialAccount, SocialMediaLinks, SortOrder,
    User,
};
use models::Ack;

/// Cache key of the unfiltered content list
pub const CONTENTS_QUERY: &str = "contents";
/// Cache key of the unfiltered business list
pub const BUSINESSES_QUERY: &str = "businesses";
/// Cache key of the user list
pub const USERS_QUERY: &str = "users";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RestClient {
    http: Client,
    base: Url,
    token: Option<String>,
    sink: Option<Weak<dyn InvalidationSink>>,
}

impl RestClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("{}/{}", crate::NAME, crate::VERSION))
            .build()?;
        Ok(Self {
            http,
            base: config.api_base()?,
            token: config.token.clone(),
            sink: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Invalidate tags on `sink` after successful mutations
    pub fn with_cache<S>(mut self, sink: &Arc<S>) -> Self
    where
        S: InvalidationSink + 'static,
    {
        let weak = Arc::downgrade(sink);
        let weak: Weak<dyn InvalidationSink> = weak;
        self.sink = Some(weak);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    // -- content --------------------------------------------------------

    pub async fn list_contents(&self, query: &ContentQuery) -> Result<ApiResponse<Vec<Content>>> {
        let response = self.request(Method::GET, "regularcontents")?.query(query).send().await?;
        self.handle_response(response).await
    }

    pub async fn get_content(&self, id: &str) -> Result<Content> {
        let path = format!("regularcontents/{}", id);
        let response = self.request(Method::GET, &path)?.send().await?;
        Ok(self.handle_response::<ApiResponse<Content>>(response).await?.data)
    }

    pub async fn create_content(&self, content: &NewContent) -> Result<Content> {
        let response = self
            .request(Method::POST, "regularcontents")?
            .json(content)
            .send()
            .await?;
        let created: ApiResponse<Content> = self.handle_response(response).await?;
        self.invalidate(CacheTag::Content);
        Ok(created.data)
    }

    pub async fn update_content(&self, id: &str, update: &ContentUpdate) -> Result<Content> {
        let path = format!("regularcontents/{}", id);
        let response = self.request(Method::PATCH, &path)?.json(update).send().await?;
        let updated: ApiResponse<Content> = self.handle_response(response).await?;
        self.invalidate(CacheTag::Content);
        Ok(updated.data)
    }

    pub async fn delete_content(&self, id: &str) -> Result<()> {
        let path = format!("regularcontents/{}", id);
        let response = self.request(Method::DELETE, &path)?.send().await?;
        self.handle_response::<Ack>(response).await?;
        self.invalidate(CacheTag::Content);
        Ok(())
    }

    // -- businesses -----------------------------------------------------

    pub async fn list_businesses(&self, query: &BusinessQuery) -> Result<ApiResponse<Vec<Business>>> {
        let response = self.request(Method::GET, "businesses")?.query(query).send().await?;
        self.handle_response(response).await
    }

    pub async fn get_business(&self, id: &str) -> Result<Business> {
        let path = format!("businesses/{}", id);
        let response = self.request(Method::GET, &path)?.send().await?;
        Ok(self.handle_response::<ApiResponse<Business>>(response).await?.data)
    }

    pub async fn create_business(&self, business: &BusinessInput) -> Result<Business> {
        let response = self.request(Method::POST, "businesses")?.json(business).send().await?;
        let created: ApiResponse<Business> = self.handle_response(response).await?;
        self.invalidate(CacheTag::Businesses);
        Ok(created.data)
    }

    pub async fn update_business(&self, id: &str, update: &BusinessInput) -> Result<Business> {
        let path = format!("businesses/{}", id);
        let response = self.request(Method::PATCH, &path)?.json(update).send().await?;
        let updated: ApiResponse<Business> = self.handle_response(response).await?;
        self.invalidate(CacheTag::Businesses);
        Ok(updated.data)
    }

    pub async fn delete_business(&self, id: &str) -> Result<()> {
        let path = format!("businesses/{}", id);
        let response = self.request(Method::DELETE, &path)?.send().await?;
        self.handle_response::<Ack>(response).await?;
        self.invalidate(CacheTag::Businesses);
        Ok(())
    }

    // -- users ----------------------------------------------------------

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let response = self.request(Method::GET, "users")?.send().await?;
        Ok(self.handle_response::<ApiResponse<Vec<User>>>(response).await?.data)
    }

    /// Register the unfiltered list queries with `cache` under
    /// [`CONTENTS_QUERY`], [`BUSINESSES_QUERY`] and [`USERS_QUERY`]
    pub fn register_queries(self: &Arc<Self>, cache: &QueryCache) {
        let client = self.clone();
        cache.register(CONTENTS_QUERY, &[CacheTag::Content], move || {
            let client = client.clone();
            async move {
                let page = client.list_contents(&ContentQuery::default()).await?;
                Ok::<_, SyncError>(serde_json::to_value(page)?)
            }
            .boxed()
        });

        let client = self.clone();
        cache.register(BUSINESSES_QUERY, &[CacheTag::Businesses], move || {
            let client = client.clone();
            async move {
                let page = client.list_businesses(&BusinessQuery::default()).await?;
                Ok::<_, SyncError>(serde_json::to_value(page)?)
            }
            .boxed()
        });

        let client = self.clone();
        cache.register(USERS_QUERY, &[CacheTag::Users], move || {
            let client = client.clone();
            async move {
                let users = client.list_users().await?;
                Ok::<_, SyncError>(serde_json::to_value(users)?)
            }
            .boxed()
        });
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.base.join(path)?;
        tracing::debug!(%method, %url, "api request");
        let mut builder = self.http.request(method, url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.message)
                .unwrap_or(text);
            tracing::warn!(status = status.as_u16(), %message, "api error");
            return Err(SyncError::Api {
                status: status.as_u16(),
                message,
            });
        }

        decode_envelope(status.as_u16(), &text)
    }

    fn invalidate(&self, tag: CacheTag) {
        if let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) {
            sink.invalidate_tags(&[tag]);
        }
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base", &self.base.as_str())
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

/// Decode a 2xx body. `success: false` is checked before the payload so a
/// failure envelope with `data: null` maps to `Api`, not `Serialization`.
fn decode_envelope<T: DeserializeOwned>(status: u16, text: &str) -> Result<T> {
    let ack: Ack = serde_json::from_str(text)?;
    if !ack.success {
        tracing::warn!(status, message = %ack.message, "api reported failure");
        return Err(SyncError::Api {
            status,
            message: ack.message,
        });
    }
    Ok(serde_json::from_str(text)?)
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_uses_api_base() {
        let client = RestClient::new(&SyncConfig::new("http://localhost:5000/api/v1")).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:5000/api/v1/");
        assert_eq!(
            client.base_url().join("regularcontents/c1").unwrap().as_str(),
            "http://localhost:5000/api/v1/regularcontents/c1"
        );
    }

    #[test]
    fn test_mutation_invalidation_uses_weak_cache() {
        let cache = Arc::new(QueryCache::new());
        let client = RestClient::new(&SyncConfig::default()).unwrap().with_cache(&cache);
        client.invalidate(CacheTag::Content);
        assert_eq!(cache.invalidations(CacheTag::Content), 1);

        drop(cache);
        client.invalidate(CacheTag::Content);
    }

    #[test]
    fn test_failure_envelope_with_null_data() {
        let body = r#"{"success":false,"message":"Business name already exists","data":null}"#;
        match decode_envelope::<ApiResponse<Business>>(200, body) {
            Err(SyncError::Api { status, message }) => {
                assert_eq!(status, 200);
                assert_eq!(message, "Business name already exists");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[test]
    fn test_success_envelope_decodes_payload() {
        let body = r#"{"success":true,"message":"","data":[]}"#;
        let users: ApiResponse<Vec<User>> = decode_envelope(200, body).unwrap();
        assert!(users.data.is_empty());

        let ack: Ack = decode_envelope(200, r#"{"success":true,"data":null}"#).unwrap();
        assert!(ack.success);
        assert!(matches!(
            decode_envelope::<Ack>(200, "not json"),
            Err(SyncError::Serialization(_))
        ));
    }
}
