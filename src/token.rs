//! Token acquisition from the endpoint named by a Bearer challenge

use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use http::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::challenge::AuthChallenge;
use crate::client::Client;
use crate::errors::{OciCertError, Result};
use crate::scope::Scope;
use crate::secrets::{Authenticable, RegistryAuth};

/// Lifetime assumed for tokens that state no expiration.
///
/// Registries treat an omitted `expires_in` as 60 seconds.
pub const DEFAULT_TOKEN_EXPIRATION_SECS: i64 = 60;

// Caps absurd `expires_in` values so the arithmetic stays in range.
const MAX_TOKEN_EXPIRATION_SECS: u64 = u32::MAX as u64;

/// A token granted during the OAuth2-like workflow for OCI registries.
#[derive(Deserialize, Clone)]
#[serde(untagged)]
enum RegistryToken {
    Token { token: String },
    AccessToken { access_token: String },
}

impl RegistryToken {
    fn into_token(self) -> String {
        match self {
            RegistryToken::Token { token } => token,
            RegistryToken::AccessToken { access_token } => access_token,
        }
    }
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(flatten)]
    token: RegistryToken,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// A bearer token handed out by a token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct TokenResponse {
    token: String,
    expires_in: Option<u64>,
    received_at: DateTime<Utc>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("received_at", &self.received_at)
            .finish()
    }
}

impl TokenResponse {
    /// Wraps a token received just now
    pub fn new(token: impl Into<String>, expires_in: Option<u64>) -> Self {
        TokenResponse {
            token: token.into(),
            expires_in,
            received_at: Utc::now(),
        }
    }

    /// Decodes the JSON body of a successful token response.
    ///
    /// `token` wins over `access_token` when both are present.
    pub fn from_json(body: &str) -> Result<Self> {
        let body: TokenBody =
            serde_json::from_str(body).map_err(|e| OciCertError::TokenRequestFailed {
                status: StatusCode::OK.as_u16(),
                message: format!("cannot decode token response: {}", e),
            })?;
        let token = body.token.into_token();
        if token.is_empty() {
            return Err(OciCertError::TokenRequestFailed {
                status: StatusCode::OK.as_u16(),
                message: "token endpoint returned an empty token".to_string(),
            });
        }
        Ok(TokenResponse::new(token, body.expires_in))
    }

    /// The raw token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The value of an `Authorization` header carrying this token
    pub fn bearer_token(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Lifetime in seconds, as announced by the token endpoint
    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }

    /// When the token was received
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// When the token stops being valid.
    ///
    /// Taken from `expires_in` if the endpoint sent it, otherwise from the
    /// `exp` claim when the token is a JWT, otherwise
    /// [`DEFAULT_TOKEN_EXPIRATION_SECS`] after receipt.
    pub fn expires_at(&self) -> DateTime<Utc> {
        if let Some(secs) = self.expires_in {
            let secs = secs.min(MAX_TOKEN_EXPIRATION_SECS) as i64;
            return self.received_at + Duration::seconds(secs);
        }
        if let Some(exp) = jwt_expiration(&self.token) {
            let exp = exp.min(i64::MAX as u64) as i64;
            if let Some(at) = Utc.timestamp_opt(exp, 0).single() {
                return at;
            }
        }
        self.received_at + Duration::seconds(DEFAULT_TOKEN_EXPIRATION_SECS)
    }

    /// Whether the token has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }
}

fn jwt_expiration(token: &str) -> Option<u64> {
    let parsed: jwt::Token<jwt::header::Header, jwt::claims::Claims, _> =
        match jwt::Token::parse_unverified(token) {
            Ok(parsed) => parsed,
            Err(error) => {
                debug!(?error, "Token is not a JWT, cannot read its expiration");
                return None;
            }
        };
    parsed.claims().registered.expiration
}

/// Requests a token for `scope` from the endpoint named by `challenge`.
///
/// The `service` and `scope` query parameters are left out when empty.
/// Basic credentials are attached when `auth` carries some. No retries are
/// attempted.
pub async fn fetch_token(
    client: &Client,
    challenge: &AuthChallenge,
    scope: &Scope,
    auth: &RegistryAuth,
) -> Result<TokenResponse> {
    let scope = scope.to_string();
    if !challenge.scope.is_empty() && challenge.scope != scope {
        debug!(challenge_scope = %challenge.scope, %scope, "Requesting the context scope instead of the challenged one");
    }

    let mut query = Vec::new();
    if !challenge.service.is_empty() {
        query.push(("service", challenge.service.as_str()));
    }
    if !scope.is_empty() {
        query.push(("scope", scope.as_str()));
    }

    let url = challenge.realm.as_str();
    debug!(realm = %url, service = %challenge.service, %scope, "Making authentication call");
    let request = client
        .http()
        .get(challenge.realm.clone())
        .query(&query)
        .apply_authentication(auth);
    let res = client.send(request, url).await?;

    let status = res.status();
    let text = res
        .text()
        .await
        .map_err(|source| OciCertError::RequestFailed {
            url: url.to_string(),
            source,
        })?;

    if status != StatusCode::OK {
        debug!(%status, reason = %text, "Failed to obtain token");
        return Err(OciCertError::TokenRequestFailed {
            status: status.as_u16(),
            message: text,
        });
    }

    let token = TokenResponse::from_json(&text)?;
    debug!(expires_in = ?token.expires_in(), "Successfully obtained token");
    Ok(token)
}
