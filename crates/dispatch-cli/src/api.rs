//! Thin REST clients for the control plane and the console.

use std::time::Duration;

use anyhow::bail;
use serde::Deserialize;

use crate::config::ResolvedApiKey;

/// Client for the console's CLI login exchange.
pub struct ConsoleClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub organizations: Vec<LoginOrganization>,
}

#[derive(Debug, Deserialize)]
pub struct LoginOrganization {
    pub slug: String,
    pub api_key: String,
}

impl ConsoleClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }

    pub fn login_url(&self, token: &str) -> String {
        format!("{}/cli-login?token={token}", self.base_url)
    }

    /// Polls the console until the browser flow completes. A 204 means the
    /// token has not been claimed yet.
    pub async fn wait_for_login(&self, token: &str) -> anyhow::Result<LoginResponse> {
        let url = format!("{}/cli-login/token", self.base_url);
        loop {
            let response = self
                .client
                .get(&url)
                .query(&[("token", token)])
                .send()
                .await?;
            match response.status() {
                reqwest::StatusCode::NO_CONTENT => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                reqwest::StatusCode::OK => {
                    return Ok(response.json::<LoginResponse>().await?);
                }
                status => bail!("login failed with status {}", status.as_u16()),
            }
        }
    }
}

/// Client for the control plane's signing-key service.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: ResolvedApiKey,
}

#[derive(Debug, Deserialize)]
pub struct SigningKey {
    #[serde(rename = "asymmetricKey")]
    pub asymmetric_key: AsymmetricKey,
}

#[derive(Debug, Deserialize)]
pub struct AsymmetricKey {
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

#[derive(Debug, Deserialize)]
struct ListSigningKeysResponse {
    keys: Vec<SigningKey>,
}

#[derive(Debug, Deserialize)]
struct CreateSigningKeyResponse {
    key: SigningKey,
}

impl ApiClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: ResolvedApiKey) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
        }
    }

    pub async fn list_signing_keys(&self) -> anyhow::Result<Vec<SigningKey>> {
        let response = self
            .call("dispatch.v1.SigningKeyService/ListSigningKeys")
            .await?;
        Ok(serde_json::from_str::<ListSigningKeysResponse>(&response)?.keys)
    }

    pub async fn create_signing_key(&self) -> anyhow::Result<SigningKey> {
        let response = self
            .call("dispatch.v1.SigningKeyService/CreateSigningKey")
            .await?;
        Ok(serde_json::from_str::<CreateSigningKeyResponse>(&response)?.key)
    }

    async fn call(&self, method: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key.key),
            )
            .body("{}")
            .send()
            .await?;
        match response.status() {
            reqwest::StatusCode::OK => Ok(response.text().await?),
            reqwest::StatusCode::UNAUTHORIZED => bail!(self.api_key.auth_error_message()),
            status => bail!("{method} failed with status {}", status.as_u16()),
        }
    }
}
