use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::PostId,
    error::ApiError,
    protocol::{CommentRecord, PostRecord},
};
use tracing::debug;
use url::Url;

use crate::error::TransportError;

pub const DEFAULT_COLLECTION: &str = "posts";
const COMMENTS_SEGMENT: &str = "comments";

/// CRUD access to the remote posts collection and its nested comments.
#[async_trait]
pub trait PostsTransport: Send + Sync {
    async fn list_posts(&self) -> Result<Vec<PostRecord>, TransportError>;
    async fn get_post(&self, id: PostId) -> Result<PostRecord, TransportError>;
    /// The remote may assign a different id than the one sent.
    async fn create_post(&self, post: &PostRecord) -> Result<PostRecord, TransportError>;
    async fn replace_post(
        &self,
        id: PostId,
        post: &PostRecord,
    ) -> Result<PostRecord, TransportError>;
    async fn delete_post(&self, id: PostId) -> Result<(), TransportError>;
    async fn list_comments(&self, post_id: PostId) -> Result<Vec<CommentRecord>, TransportError>;
    async fn create_comment(
        &self,
        post_id: PostId,
        comment: &CommentRecord,
    ) -> Result<CommentRecord, TransportError>;
}

pub struct MissingTransport;

fn unavailable<T>() -> Result<T, TransportError> {
    Err(TransportError::new("posts transport is unavailable"))
}

#[async_trait]
impl PostsTransport for MissingTransport {
    async fn list_posts(&self) -> Result<Vec<PostRecord>, TransportError> {
        unavailable()
    }

    async fn get_post(&self, _id: PostId) -> Result<PostRecord, TransportError> {
        unavailable()
    }

    async fn create_post(&self, _post: &PostRecord) -> Result<PostRecord, TransportError> {
        unavailable()
    }

    async fn replace_post(
        &self,
        _id: PostId,
        _post: &PostRecord,
    ) -> Result<PostRecord, TransportError> {
        unavailable()
    }

    async fn delete_post(&self, _id: PostId) -> Result<(), TransportError> {
        unavailable()
    }

    async fn list_comments(&self, _post_id: PostId) -> Result<Vec<CommentRecord>, TransportError> {
        unavailable()
    }

    async fn create_comment(
        &self,
        _post_id: PostId,
        _comment: &CommentRecord,
    ) -> Result<CommentRecord, TransportError> {
        unavailable()
    }
}

/// JSON-over-HTTP transport for a JSONPlaceholder-style API.
pub struct HttpTransport {
    http: Client,
    base_url: Url,
    collection: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder().timeout(timeout).build()?;
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url.trim())?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(TransportError::new(format!(
                "posts api url must be an http(s) base url: {base_url}"
            )));
        }
        Ok(Self {
            http,
            base_url,
            collection: DEFAULT_COLLECTION.to_string(),
        })
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, tail: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                TransportError::new(format!("posts api url cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .push(&self.collection)
            .extend(tail);
        Ok(url)
    }

    fn post_url(&self, id: PostId) -> Result<Url, TransportError> {
        self.url(&[&id.0.to_string()])
    }

    fn comments_url(&self, post_id: PostId) -> Result<Url, TransportError> {
        self.url(&[&post_id.0.to_string(), COMMENTS_SEGMENT])
    }
}

async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => api_error.message,
        Err(_) => format!("request failed with status {status}"),
    };
    Err(TransportError::with_status(status.as_u16(), message))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    let response = check_status(response).await?;
    Ok(response.json().await?)
}

#[async_trait]
impl PostsTransport for HttpTransport {
    async fn list_posts(&self) -> Result<Vec<PostRecord>, TransportError> {
        let url = self.url(&[])?;
        debug!("posts transport: GET {url}");
        read_json(self.http.get(url).send().await?).await
    }

    async fn get_post(&self, id: PostId) -> Result<PostRecord, TransportError> {
        let url = self.post_url(id)?;
        debug!("posts transport: GET {url}");
        read_json(self.http.get(url).send().await?).await
    }

    async fn create_post(&self, post: &PostRecord) -> Result<PostRecord, TransportError> {
        let url = self.url(&[])?;
        debug!("posts transport: POST {url}");
        read_json(self.http.post(url).json(post).send().await?).await
    }

    async fn replace_post(
        &self,
        id: PostId,
        post: &PostRecord,
    ) -> Result<PostRecord, TransportError> {
        let url = self.post_url(id)?;
        debug!("posts transport: PUT {url}");
        read_json(self.http.put(url).json(post).send().await?).await
    }

    async fn delete_post(&self, id: PostId) -> Result<(), TransportError> {
        let url = self.post_url(id)?;
        debug!("posts transport: DELETE {url}");
        check_status(self.http.delete(url).send().await?).await?;
        Ok(())
    }

    async fn list_comments(&self, post_id: PostId) -> Result<Vec<CommentRecord>, TransportError> {
        let url = self.comments_url(post_id)?;
        debug!("posts transport: GET {url}");
        read_json(self.http.get(url).send().await?).await
    }

    async fn create_comment(
        &self,
        post_id: PostId,
        comment: &CommentRecord,
    ) -> Result<CommentRecord, TransportError> {
        let url = self.comments_url(post_id)?;
        debug!("posts transport: POST {url}");
        read_json(self.http.post(url).json(comment).send().await?).await
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
