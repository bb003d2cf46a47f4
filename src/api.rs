//! Typed client for the four ZgrWise API endpoints this crate consumes.
//!
//! | Method | Path | Used by |
//! |--------|------|---------|
//! | `POST` | `/api/sources` | capture client, step 1 |
//! | `POST` | `/api/highlights` | capture client, step 2 |
//! | `GET`  | `/api/highlights` | vault sync |
//! | `GET`  | `/health` | connectivity check |
//!
//! Every request carries the `X-API-Key` header. Each call is attempted
//! exactly once; there is no retry layer here.

use reqwest::{Method, StatusCode};
use std::time::Duration;
use thiserror::Error;

use crate::config::ApiCredentials;
use crate::models::{CreatedSource, NewHighlight, NewSource, RemoteHighlight};

pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Error)]
pub enum ApiError {
    /// The server answered with a non-2xx status.
    #[error("{method} {path} returned {status}")]
    Status {
        method: Method,
        path: &'static str,
        status: StatusCode,
    },
    /// The request could not be sent or the body could not be read.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    key: String,
}

impl ApiClient {
    pub fn new(credentials: &ApiCredentials, timeout_secs: Option<u64>) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            http: builder.build()?,
            base: credentials.base.trim_end_matches('/').to_string(),
            key: credentials.key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header(API_KEY_HEADER, &self.key)
    }

    async fn execute(
        &self,
        method: Method,
        path: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        tracing::debug!("{} {}", method, path);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!("{} {} -> {}", method, path, status);
            return Err(ApiError::Status {
                method,
                path,
                status,
            });
        }
        Ok(response)
    }

    /// Create a source, or get back the one the server already has for
    /// this URL. Either way the returned id is usable.
    pub async fn create_source(&self, source: &NewSource) -> Result<CreatedSource, ApiError> {
        let path = "/api/sources";
        let request = self.request(Method::POST, path).json(source);
        let response = self.execute(Method::POST, path, request).await?;
        Ok(response.json::<CreatedSource>().await?)
    }

    pub async fn create_highlight(&self, highlight: &NewHighlight) -> Result<(), ApiError> {
        let path = "/api/highlights";
        let request = self.request(Method::POST, path).json(highlight);
        self.execute(Method::POST, path, request).await?;
        Ok(())
    }

    /// The whole highlight collection in one response.
    pub async fn list_highlights(&self) -> Result<Vec<RemoteHighlight>, ApiError> {
        let path = "/api/highlights";
        let request = self.request(Method::GET, path);
        let response = self.execute(Method::GET, path, request).await?;
        Ok(response.json::<Vec<RemoteHighlight>>().await?)
    }

    pub async fn health(&self) -> Result<(), ApiError> {
        let path = "/health";
        let request = self.request(Method::GET, path);
        self.execute(Method::GET, path, request).await?;
        Ok(())
    }
}
