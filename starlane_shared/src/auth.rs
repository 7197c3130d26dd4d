//! External login-service collaborator.
//!
//! When a login URL is configured, connecting peers must present an opaque
//! token which the server exchanges for a verified identity over HTTP. The
//! round-trip runs on an auxiliary task so the transport listener never
//! blocks on third-party I/O; the result re-enters the listener through its
//! event queue.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::guid::PlayerGuid;

/// Verifies an opaque login token against an external service.
///
/// `Ok(None)` means the service answered but did not vouch for an identity;
/// `Err` means the round-trip itself failed. Both reject the peer.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, login_url: &str, token: &str) -> anyhow::Result<Option<PlayerGuid>>;
}

#[derive(Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    guid: Option<String>,
}

/// Production verifier: POSTs the token to the login service.
pub struct HttpTokenVerifier {
    client: reqwest::Client,
}

impl HttpTokenVerifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTokenVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, login_url: &str, token: &str) -> anyhow::Result<Option<PlayerGuid>> {
        let resp = self
            .client
            .post(login_url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .context("login service request")?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body: VerifyResponse = resp.json().await.context("login service response body")?;
        let guid = body
            .guid
            .as_deref()
            .and_then(PlayerGuid::from_hex)
            .filter(PlayerGuid::is_valid);
        Ok(guid)
    }
}

/// Test verifier backed by a fixed token → identity map.
#[derive(Default)]
pub struct StaticTokenVerifier {
    identities: HashMap<String, PlayerGuid>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, token: &str, guid: PlayerGuid) -> Self {
        self.identities.insert(token.to_owned(), guid);
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, _login_url: &str, token: &str) -> anyhow::Result<Option<PlayerGuid>> {
        Ok(self.identities.get(token).copied())
    }
}
