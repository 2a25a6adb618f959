use anyhow::{bail, Context};

use crate::api::ApiClient;
use crate::config::{ResolvedApiKey, Settings};

pub async fn get(settings: &Settings, api_key: ResolvedApiKey) -> anyhow::Result<()> {
    let api = ApiClient::new(reqwest::Client::new(), &settings.api_url, api_key);
    println!("Fetching active verification key...");
    let keys = api
        .list_signing_keys()
        .await
        .context("failed to list keys")?;
    let Some(key) = keys.first() else {
        bail!("Key not found. Use `dispatch verification rollout` to create the first key.");
    };
    println!("{}", key.asymmetric_key.public_key);
    Ok(())
}

pub async fn rollout(settings: &Settings, api_key: ResolvedApiKey) -> anyhow::Result<()> {
    let api = ApiClient::new(reqwest::Client::new(), &settings.api_url, api_key);
    println!("Creating a new verification key...");
    let key = api
        .create_signing_key()
        .await
        .context("failed to create key")?;
    println!("New key:\n\n{}", key.asymmetric_key.public_key);
    Ok(())
}
