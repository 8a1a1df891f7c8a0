use anyhow::Result;
use chat_relay_core::session::Turn;
use reqwest::{Client, StatusCode, Url};

/// Minimal client for the read-only session routes of a running server
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `<base>/api/sessions/<session>/<rest..>` with every segment escaped
    fn session_url(&self, session: &str, rest: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("invalid server URL: {}", self.base_url))?
            .pop_if_empty()
            .extend(["api", "sessions", session])
            .extend(rest);
        Ok(url)
    }

    pub async fn history(&self, session: &str) -> Result<Vec<Turn>> {
        let url = self.session_url(session, &[])?;
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("Server returned error: {}", response.status());
        }
        Ok(response.json().await?)
    }

    /// Markdown export, or `None` when the server has no turns for the session
    pub async fn export(&self, session: &str) -> Result<Option<String>> {
        let url = self.session_url(session, &["export"])?;
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await?)),
            status => anyhow::bail!("Server returned error: {}", status),
        }
    }
}
