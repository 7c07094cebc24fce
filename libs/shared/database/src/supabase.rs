use anyhow::{Context, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Non-success PostgREST response, kept typed inside the `anyhow::Error` so
/// callers can tell constraint violations from infrastructure faults.
#[derive(Debug, Error)]
#[error("PostgREST error ({status}): {body}")]
pub struct PostgrestError {
    pub status: StatusCode,
    pub body: String,
}

impl PostgrestError {
    /// Unique-constraint violation (`23505`), reported by PostgREST as 409.
    pub fn is_unique_violation(&self) -> bool {
        self.status == StatusCode::CONFLICT || self.body.contains("23505")
    }
}

pub fn unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PostgrestError>()
        .map(PostgrestError::is_unique_violation)
        .unwrap_or(false)
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>, prefer: Option<&'static str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key).context("invalid Supabase key")?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Engine-side calls run with the service key when no user token is given.
        let bearer = auth_token.unwrap_or(&self.anon_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", bearer)).context("invalid bearer token")?,
        );

        if let Some(prefer) = prefer {
            headers.insert("Prefer", HeaderValue::from_static(prefer));
        }

        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        prefer: Option<&'static str>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut req = self.client.request(method, &url).headers(self.get_headers(auth_token, prefer)?);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, body);
            return Err(anyhow::Error::new(PostgrestError { status, body }));
        }

        Ok(response)
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(method, path, auth_token, body, None).await?;
        Ok(response.json::<T>().await?)
    }

    /// Writes with `Prefer: return=representation` and returns the affected
    /// rows. A conditional PATCH whose filter matched nothing yields an empty
    /// vector, which is how compare-and-set failures surface.
    pub async fn mutate_returning<T>(&self, method: Method, path: &str, body: Value) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .send(method, path, None, Some(body), Some("return=representation"))
            .await?;
        Ok(response.json::<Vec<T>>().await?)
    }

    /// Bulk insert that skips rows colliding with a unique key.
    pub async fn insert_ignoring_duplicates<T>(&self, path: &str, rows: Value) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .send(
                Method::POST,
                path,
                None,
                Some(rows),
                Some("return=representation,resolution=ignore-duplicates"),
            )
            .await?;
        Ok(response.json::<Vec<T>>().await?)
    }

    pub async fn select<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        self.request::<Vec<T>>(Method::GET, path, None, None).await
    }
}
