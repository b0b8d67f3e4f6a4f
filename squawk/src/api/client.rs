//! REST client for the authority, backing the CLI verbs.

use crate::api::types::{LoadSet, MessageKeyRecord, TokenKeyRecord};
use crate::authority::AuthorizationRequest;
use anyhow::Result;
use uuid::Uuid;

pub struct AuthorityClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthorityClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Request an authorization grant; returns the resulting load set.
    pub async fn authorize(&self, request: &AuthorizationRequest) -> Result<LoadSet> {
        let url = format!("{}/authorization", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            anyhow::bail!(
                "authorization request failed: {} {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }
        Ok(response.json().await?)
    }

    pub async fn load_set(&self, gufi: Uuid) -> Result<LoadSet> {
        let url = format!("{}/loadset/{}", self.base_url, gufi);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("failed to fetch load set: {}", response.status());
        }
        Ok(response.json().await?)
    }

    pub async fn token_keys(&self) -> Result<Vec<TokenKeyRecord>> {
        let url = format!("{}/token_keys", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("failed to fetch token keys: {}", response.status());
        }
        Ok(response.json().await?)
    }

    pub async fn message_keys(&self) -> Result<Vec<MessageKeyRecord>> {
        let url = format!("{}/message_keys", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("failed to fetch message keys: {}", response.status());
        }
        Ok(response.json().await?)
    }
}
