//! Backend REST client for the conversation subsystem: ephemeral
//! credential issuance and end-of-call transcript sync.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::conversation::ConversationId;
use crate::error::CallError;
use crate::realtime::TranscriptTurn;
use crate::retry::{RetryPolicy, classify_reqwest_result, retry_with_backoff};

/// Short-lived secret authorizing exactly one realtime socket connection.
///
/// Fetched once per call attempt, carried only in the socket subprotocol
/// list, and never persisted. `Debug` is redacted so the secret cannot
/// leak through logs.
#[derive(Clone, Deserialize)]
pub struct RealtimeCredential {
    pub secret: String,
}

impl std::fmt::Debug for RealtimeCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeCredential")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Thin client for the Flora backend endpoints this subsystem needs.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    retry: RetryPolicy,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &crate::config::ApiConfig) -> Self {
        Self::new(config.base_url.clone(), config.access_token.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Fetch an ephemeral credential for one call attempt.
    ///
    /// Transient transport failures and 5xx responses are retried under
    /// the client's backoff policy before the failure is surfaced.
    pub async fn fetch_realtime_token(
        &self,
        conversation_id: Option<ConversationId>,
        plant_id: Option<i64>,
    ) -> Result<RealtimeCredential, CallError> {
        let url = format!("{}/chat/realtime-token", self.base_url);
        let mut body = json!({});
        if let Some(id) = conversation_id {
            body["conversation_id"] = json!(id);
        }
        if let Some(id) = plant_id {
            body["plant_id"] = json!(id);
        }

        let result = retry_with_backoff(
            &self.retry,
            |attempt| {
                let builder = self.authorized(self.http.post(&url).json(&body));
                async move {
                    debug!(attempt, "requesting realtime credential");
                    builder.send().await
                }
            },
            classify_reqwest_result,
            |info| {
                debug!(
                    attempt = info.attempt,
                    reason = info.reason.as_str(),
                    "retrying credential fetch"
                );
            },
        )
        .await;

        let resp = result.map_err(|e| CallError::Credential(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(CallError::Credential(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }
        resp.json::<RealtimeCredential>()
            .await
            .map_err(|e| CallError::Credential(format!("malformed token response: {e}")))
    }

    /// Upload the finished call transcript, keyed by conversation.
    ///
    /// An empty transcript is never sent. Callers treat this as
    /// fire-and-forget: a failure is logged on their side, not shown.
    pub async fn sync_transcript(
        &self,
        conversation_id: Option<ConversationId>,
        turns: &[TranscriptTurn],
    ) -> Result<()> {
        if turns.is_empty() {
            return Ok(());
        }

        let url = format!("{}/chat/voice-transcript", self.base_url);
        let body = json!({ "conversation_id": conversation_id, "turns": turns });

        let resp = self
            .authorized(self.http.post(&url).json(&body))
            .send()
            .await
            .context("transcript sync request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("transcript sync returned {}", resp.status());
        }

        debug!(turns = turns.len(), "synced voice transcript");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    #[test]
    fn credential_debug_is_redacted() {
        let credential = RealtimeCredential {
            secret: "ek_live_very_secret".to_string(),
        };
        let printed = format!("{credential:?}");
        assert!(!printed.contains("very_secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn base_url_is_normalized() {
        let client = BackendClient::new("https://api.floragarden.app/v1/", None);
        assert_eq!(client.base_url(), "https://api.floragarden.app/v1");
    }

    #[tokio::test]
    async fn empty_transcript_is_not_sent() {
        // Discard port: if a request were made it would fail, so Ok here
        // proves the guard short-circuited.
        let client = BackendClient::new("http://127.0.0.1:9", None);
        assert!(client.sync_transcript(Some(1), &[]).await.is_ok());
    }

    #[tokio::test]
    async fn transcript_sync_surfaces_transport_failure() {
        let client = BackendClient::new("http://127.0.0.1:9", None);
        let turns = vec![TranscriptTurn::new(Role::User, "hello")];
        assert!(client.sync_transcript(Some(1), &turns).await.is_err());
    }
}
