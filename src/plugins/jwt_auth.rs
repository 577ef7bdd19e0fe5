//! Bearer-token authentication over compact JWS (HMAC family).
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use eyre::Result;
use hmac::{Hmac, Mac};
use http::{HeaderValue, Method, StatusCode};
use serde::Deserialize;
use sha2::{Sha256, Sha384, Sha512};

use crate::plugins::{Consumer, Plugin, ProxyResponse, RequestContext};

fn default_secret() -> String {
    "your-secret-key".to_string()
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_header_names() -> Vec<String> {
    vec!["Authorization".to_string()]
}

fn default_claims() -> Vec<String> {
    vec!["exp".to_string()]
}

fn default_run_on_preflight() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct JwtOptions {
    #[serde(default = "default_secret")]
    secret: String,
    #[serde(default = "default_algorithm")]
    algorithm: String,
    #[serde(default = "default_header_names")]
    header_names: Vec<String>,
    #[serde(default = "default_claims")]
    claims_to_verify: Vec<String>,
    #[serde(default)]
    anonymous: Option<String>,
    #[serde(default = "default_run_on_preflight")]
    run_on_preflight: bool,
}

pub struct JwtAuthPlugin {
    options: JwtOptions,
}

impl JwtAuthPlugin {
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        let options: JwtOptions = serde_json::from_value(options.clone())?;
        if !["HS256", "HS384", "HS512"].contains(&options.algorithm.as_str()) {
            eyre::bail!("unsupported jwt algorithm '{}'", options.algorithm);
        }
        Ok(Self { options })
    }

    fn extract_token(&self, ctx: &RequestContext) -> Option<String> {
        for header_name in &self.options.header_names {
            if let Some(value) = ctx.header(header_name) {
                return Some(
                    value
                        .strip_prefix("Bearer ")
                        .unwrap_or(value)
                        .to_string(),
                );
            }
        }
        ctx.query_param("jwt")
    }

    fn verify_signature(&self, signing_input: &str, signature: &[u8]) -> bool {
        let secret = self.options.secret.as_bytes();
        match self.options.algorithm.as_str() {
            "HS256" => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts any key length");
                mac.update(signing_input.as_bytes());
                mac.verify_slice(signature).is_ok()
            }
            "HS384" => {
                let mut mac =
                    Hmac::<Sha384>::new_from_slice(secret).expect("hmac accepts any key length");
                mac.update(signing_input.as_bytes());
                mac.verify_slice(signature).is_ok()
            }
            "HS512" => {
                let mut mac =
                    Hmac::<Sha512>::new_from_slice(secret).expect("hmac accepts any key length");
                mac.update(signing_input.as_bytes());
                mac.verify_slice(signature).is_ok()
            }
            _ => false,
        }
    }

    /// Verify a compact JWS and return its claims.
    fn verify(&self, token: &str) -> std::result::Result<serde_json::Value, &'static str> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(p), Some(s), None) => (h, p, s),
                _ => return Err("malformed token"),
            };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| "malformed header")?;
        let header: serde_json::Value =
            serde_json::from_slice(&header_bytes).map_err(|_| "malformed header")?;
        if header.get("alg").and_then(|a| a.as_str()) != Some(self.options.algorithm.as_str()) {
            return Err("algorithm mismatch");
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| "malformed signature")?;
        let signing_input = format!("{header_b64}.{payload_b64}");
        if !self.verify_signature(&signing_input, &signature) {
            return Err("signature mismatch");
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| "malformed payload")?;
        let claims: serde_json::Value =
            serde_json::from_slice(&payload_bytes).map_err(|_| "malformed payload")?;

        for claim in &self.options.claims_to_verify {
            let value = claims.get(claim).ok_or("missing required claim")?;
            if claim == "exp" {
                let exp = value.as_i64().ok_or("malformed exp claim")?;
                if exp <= chrono::Utc::now().timestamp() {
                    return Err("token expired");
                }
            }
        }

        Ok(claims)
    }

    fn unauthorized(message: &str, challenge: &'static str) -> ProxyResponse {
        ProxyResponse::error(StatusCode::UNAUTHORIZED, message).with_header(
            http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static(challenge),
        )
    }
}

#[async_trait]
impl Plugin for JwtAuthPlugin {
    fn name(&self) -> &'static str {
        "jwt-auth"
    }

    async fn access(&self, ctx: &mut RequestContext) -> Result<()> {
        if ctx.method == Method::OPTIONS && !self.options.run_on_preflight {
            return Ok(());
        }

        let Some(token) = self.extract_token(ctx) else {
            if let Some(anonymous) = &self.options.anonymous {
                ctx.consumer = Some(Consumer {
                    username: Some(anonymous.clone()),
                    ..Default::default()
                });
                ctx.authenticated = false;
                return Ok(());
            }
            ctx.set_short_circuit(Self::unauthorized(
                "missing authentication token",
                "Bearer",
            ));
            return Ok(());
        };

        match self.verify(&token) {
            Ok(claims) => {
                let sub = claims
                    .get("sub")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                let username = claims
                    .get("username")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .or_else(|| sub.clone());

                if let Some(user_id) = &sub {
                    if let Ok(value) = HeaderValue::from_str(user_id) {
                        ctx.headers.insert("x-user-id", value);
                    }
                }
                ctx.consumer = Some(Consumer {
                    username,
                    custom_id: None,
                    user_id: sub,
                });
                ctx.authenticated = true;
            }
            Err(reason) => {
                tracing::debug!(reason, "jwt verification failed");
                ctx.set_short_circuit(Self::unauthorized(
                    "invalid token",
                    "Bearer error=\"invalid_token\"",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;
    use crate::plugins::test_support::context;

    fn plugin(options: serde_json::Value) -> JwtAuthPlugin {
        JwtAuthPlugin::from_options(&options).unwrap()
    }

    /// Sign a token the way a client library would.
    fn sign_hs256(secret: &str, claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        let signing_input = format!("{header}.{payload}");
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{signing_input}.{signature}")
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn test_garbage_bearer_token_rejected() {
        let plugin = plugin(serde_json::json!({ "secret": "k" }));
        let mut ctx = context(Method::GET, "/api");
        ctx.headers
            .insert("authorization", HeaderValue::from_static("Bearer abc"));

        plugin.access(&mut ctx).await.unwrap();
        let resp = ctx.short_circuit.expect("rejected");
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_token_rejected_with_challenge() {
        let plugin = plugin(serde_json::json!({ "secret": "k" }));
        let mut ctx = context(Method::GET, "/api");

        plugin.access(&mut ctx).await.unwrap();
        let resp = ctx.short_circuit.expect("rejected");
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers.get(http::header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[tokio::test]
    async fn test_valid_token_sets_consumer() {
        let plugin = plugin(serde_json::json!({ "secret": "k" }));
        let token = sign_hs256(
            "k",
            &serde_json::json!({ "sub": "user-7", "exp": future_exp() }),
        );
        let mut ctx = context(Method::GET, "/api");
        ctx.headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );

        plugin.access(&mut ctx).await.unwrap();
        assert!(ctx.short_circuit.is_none());
        assert!(ctx.authenticated);
        let consumer = ctx.consumer.as_ref().unwrap();
        assert_eq!(consumer.user_id.as_deref(), Some("user-7"));
        assert_eq!(ctx.headers.get("x-user-id").unwrap(), "user-7");
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let plugin = plugin(serde_json::json!({ "secret": "k" }));
        let token = sign_hs256(
            "k",
            &serde_json::json!({ "sub": "u", "exp": chrono::Utc::now().timestamp() - 10 }),
        );
        let mut ctx = context(Method::GET, "/api");
        ctx.headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );

        plugin.access(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.short_circuit.unwrap().status,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let plugin = plugin(serde_json::json!({ "secret": "k" }));
        let token = sign_hs256(
            "other",
            &serde_json::json!({ "sub": "u", "exp": future_exp() }),
        );
        let mut ctx = context(Method::GET, "/api");
        ctx.headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );

        plugin.access(&mut ctx).await.unwrap();
        assert!(ctx.short_circuit.is_some());
    }

    #[tokio::test]
    async fn test_missing_required_claim_rejected() {
        let plugin = plugin(serde_json::json!({ "secret": "k" }));
        let token = sign_hs256("k", &serde_json::json!({ "sub": "u" }));
        let mut ctx = context(Method::GET, "/api");
        ctx.headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );

        plugin.access(&mut ctx).await.unwrap();
        assert!(ctx.short_circuit.is_some());
    }

    #[tokio::test]
    async fn test_anonymous_permits_missing_token() {
        let plugin = plugin(serde_json::json!({ "secret": "k", "anonymous": "guest" }));
        let mut ctx = context(Method::GET, "/api");

        plugin.access(&mut ctx).await.unwrap();
        assert!(ctx.short_circuit.is_none());
        assert!(!ctx.authenticated);
        assert_eq!(
            ctx.consumer.unwrap().username.as_deref(),
            Some("guest")
        );
    }

    #[tokio::test]
    async fn test_token_from_query_param() {
        let secret = "k";
        let token = sign_hs256(secret, &serde_json::json!({ "sub": "u", "exp": future_exp() }));
        let plugin = plugin(serde_json::json!({ "secret": secret }));
        let mut ctx = context(Method::GET, &format!("/api?jwt={token}"));

        plugin.access(&mut ctx).await.unwrap();
        assert!(ctx.short_circuit.is_none());
        assert!(ctx.authenticated);
    }

    #[test]
    fn test_unsupported_algorithm_rejected_at_build() {
        assert!(JwtAuthPlugin::from_options(&serde_json::json!({ "algorithm": "RS256" })).is_err());
    }
}
