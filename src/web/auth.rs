//! Caller identity resolution against the external identity provider.
//!
//! The provider is opaque: given a bearer token it answers with
//! `{user_id, is_premium}` or nothing. Responses are cached for a minute so
//! progress streams and chapter fan-outs do not hammer the endpoint. With no
//! endpoint configured every request is anonymous.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, header};
use serde::Deserialize;
use tracing::debug;

use crate::jobs::Identity;
use crate::web::state::AppState;

const CACHE_TTL: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct IdentityResolver {
    endpoint: Option<String>,
    client: reqwest::blocking::Client,
    cache: Mutex<HashMap<String, (Identity, Instant)>>,
}

#[derive(Debug, Deserialize)]
struct ResolvedUser {
    user_id: String,
    #[serde(default)]
    is_premium: bool,
}

impl IdentityResolver {
    pub(crate) fn new(endpoint: Option<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            endpoint,
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a token to an identity. Blocking; call via `spawn_blocking`.
    pub(crate) fn resolve_blocking(&self, token: &str) -> Option<Identity> {
        let endpoint = self.endpoint.as_deref()?;
        if token.is_empty() {
            return None;
        }

        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((identity, fetched_at)) = cache.get(token)
                && fetched_at.elapsed() < CACHE_TTL
            {
                return Some(identity.clone());
            }
        }

        let resolved: ResolvedUser = self
            .client
            .get(endpoint)
            .bearer_auth(token)
            .send()
            .and_then(|r| r.error_for_status())
            .ok()?
            .json()
            .ok()?;
        let identity = Identity {
            user_id: resolved.user_id,
            is_premium: resolved.is_premium,
        };
        debug!(target: "auth", user = %identity.user_id, premium = identity.is_premium, "identity resolved");

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(token.to_string(), (identity.clone(), Instant::now()));
        Some(identity)
    }
}

/// Pull the bearer token from the Authorization header, else from the
/// `token` query parameter (EventSource cannot set headers).
pub(crate) fn bearer_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .filter(|token| !token.is_empty())
        .or_else(|| {
            query_token
                .map(str::to_string)
                .filter(|token| !token.is_empty())
        })
}

pub(crate) async fn current_user(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Option<Identity> {
    let token = bearer_token(headers, query_token)?;
    let resolver = state.identity.clone();
    tokio::task::spawn_blocking(move || resolver.resolve_blocking(&token))
        .await
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_prefers_the_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers, Some("qqq")), Some("abc".to_string()));
        assert_eq!(
            bearer_token(&HeaderMap::new(), Some("qqq")),
            Some("qqq".to_string())
        );
        assert_eq!(bearer_token(&HeaderMap::new(), None), None);
        assert_eq!(bearer_token(&HeaderMap::new(), Some("")), None);
    }

    #[test]
    fn no_endpoint_means_anonymous() {
        let resolver = IdentityResolver::new(None);
        assert!(resolver.resolve_blocking("any-token").is_none());
    }
}
