use std::time::Duration;

use {
    async_trait::async_trait,
    http::HeaderMap,
    serde::Deserialize,
    tracing::warn,
};

use parley_common::{AppError, CircuitBreaker, ErrorCode, Result, RetryPolicy};

use crate::state::GatewayState;

/// Authenticated caller identity.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub phone: Option<String>,
}

/// Validates bearer tokens against the Auth Service.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity>;
}

/// HTTP client for the Auth Service verification RPC, wrapped in the
/// standard retry policy and circuit breaker for transient failures.
pub struct HttpAuthVerifier {
    client: reqwest::Client,
    verify_url: String,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

#[derive(Deserialize)]
struct VerifyResponse {
    user_id: String,
    #[serde(default)]
    phone: Option<String>,
}

impl HttpAuthVerifier {
    pub fn new(verify_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            verify_url,
            retry: RetryPolicy::default(),
            breaker: CircuitBreaker::new(5, Duration::from_secs(30)),
        }
    }

    async fn call(&self, token: &str) -> Result<Identity> {
        let resp = self
            .client
            .post(&self.verify_url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| AppError::internal("auth service unreachable", e))?;

        match resp.status().as_u16() {
            200 => {
                let body: VerifyResponse = resp
                    .json()
                    .await
                    .map_err(|e| AppError::internal("bad auth service response", e))?;
                Ok(Identity {
                    user_id: body.user_id,
                    phone: body.phone,
                })
            },
            401 | 403 => Err(AppError::new(ErrorCode::TokenInvalid, "invalid token")),
            status => Err(AppError::internal_msg(format!(
                "auth service returned {status}"
            ))),
        }
    }
}

#[async_trait]
impl AuthVerifier for HttpAuthVerifier {
    async fn verify(&self, token: &str) -> Result<Identity> {
        self.breaker.check()?;
        let result = self.retry.run(|| self.call(token)).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(e) if e.code.is_transient() => self.breaker.record_failure(),
            Err(_) => {},
        }
        result
    }
}

/// Origin allow-list check. An absent Origin header is accepted
/// (non-browser clients); unknown origins are refused unless the
/// development override is on.
pub fn origin_allowed(state: &GatewayState, headers: &HeaderMap) -> bool {
    if state.auth.allow_any_origin {
        return true;
    }
    let Some(origin) = headers.get(http::header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return true;
    };
    state
        .auth
        .allowed_origins
        .iter()
        .any(|allowed| origin.starts_with(allowed.as_str()))
}

/// Resolve the caller's identity from trusted upstream headers or a bearer
/// token (header or query string), in that order.
pub async fn authenticate(
    state: &GatewayState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Identity> {
    if state.auth.trust_gateway_headers
        && let Some(user_id) = header_str(headers, "x-user-id")
    {
        return Ok(Identity {
            user_id: user_id.to_string(),
            phone: header_str(headers, "x-user-phone").map(str::to_string),
        });
    }

    let token = bearer_token(headers)
        .or(query_token)
        .ok_or_else(|| AppError::unauthorized("missing credentials"))?;

    let Some(verifier) = state.auth.verifier.as_ref() else {
        warn!("no auth verifier configured, refusing token auth");
        return Err(AppError::unauthorized("token auth unavailable"));
    };
    verifier.verify(token).await.map_err(|e| {
        if e.code == ErrorCode::TokenInvalid || e.code == ErrorCode::TokenExpired {
            e
        } else {
            AppError::unauthorized("token validation failed")
        }
    })
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verifier_accepts_valid_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/verify")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"user_id":"u1","phone":"+15550001"}"#)
            .create_async()
            .await;

        let verifier = HttpAuthVerifier::new(format!("{}/verify", server.url()));
        let identity = verifier.verify("tok").await.unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.phone.as_deref(), Some("+15550001"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn verifier_maps_401_to_token_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/verify")
            .with_status(401)
            .create_async()
            .await;

        let verifier = HttpAuthVerifier::new(format!("{}/verify", server.url()));
        let err = verifier.verify("bad").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TokenInvalid);
    }
}
