//! Per-scenario authentication state and the authenticated dispatcher

use std::convert::TryFrom;

use bytes::Bytes;
use http::{Method, StatusCode};
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use tracing::{debug, warn};

use crate::challenge::AuthChallenge;
use crate::client::Client;
use crate::errors::{OciCertError, Result};
use crate::scope::Scope;
use crate::secrets::RegistryAuth;
use crate::status::StatusSet;
use crate::token::{fetch_token, TokenResponse};

/// Where a context stands in the challenge/response flow
#[derive(Debug, Clone, Default)]
pub enum AuthState {
    /// `prepare_auth` has not run yet, or the scope changed since
    #[default]
    Unauthenticated,
    /// The registry can be talked to; `token` is `None` when it asked for none
    Ready {
        /// Token to present on every request
        token: Option<TokenResponse>,
    },
    /// The last `prepare_auth` failed
    Failed {
        /// Why it failed
        reason: String,
        /// The token held before the failed attempt, kept as is
        token: Option<TokenResponse>,
    },
}

impl AuthState {
    /// The token requests are sent with, if any
    pub fn token(&self) -> Option<&TokenResponse> {
        match self {
            AuthState::Unauthenticated => None,
            AuthState::Ready { token } | AuthState::Failed { token, .. } => token.as_ref(),
        }
    }

    /// Whether the last `prepare_auth` succeeded
    pub fn is_ready(&self) -> bool {
        matches!(self, AuthState::Ready { .. })
    }

    fn into_token(self) -> Option<TokenResponse> {
        match self {
            AuthState::Unauthenticated => None,
            AuthState::Ready { token } | AuthState::Failed { token, .. } => token,
        }
    }
}

/// Authentication context for one scenario against one index server.
///
/// The context owns its token: nothing else reads or replaces it. Run
/// [`prepare_auth`](Self::prepare_auth) before sending requests that need
/// authorization, and again to refresh an expired token.
pub struct RegAuthContext {
    client: Client,
    index_server: Option<String>,
    scope: Scope,
    credentials: RegistryAuth,
    state: AuthState,
}

impl RegAuthContext {
    /// Creates an unauthenticated context that will ask for `scope`
    pub fn new(client: Client, scope: Scope) -> Self {
        RegAuthContext {
            client,
            index_server: None,
            scope,
            credentials: RegistryAuth::Anonymous,
            state: AuthState::Unauthenticated,
        }
    }

    /// Credentials to present to the token endpoint
    pub fn with_credentials(mut self, credentials: RegistryAuth) -> Self {
        self.credentials = credentials;
        self
    }

    /// The scope tokens are requested for
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Replaces the scope.
    ///
    /// A token granted for the previous scope is dropped and the context
    /// goes back to [`AuthState::Unauthenticated`].
    pub fn set_scope(&mut self, scope: Scope) {
        if scope != self.scope {
            debug!(old = %self.scope, new = %scope, "Scope changed, dropping token");
            self.scope = scope;
            self.state = AuthState::Unauthenticated;
        }
    }

    /// The index server of the last `prepare_auth`
    pub fn index_server(&self) -> Option<&str> {
        self.index_server.as_deref()
    }

    /// The current state
    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// The token requests are sent with, if any
    pub fn token(&self) -> Option<&TokenResponse> {
        self.state.token()
    }

    /// Whether the last `prepare_auth` succeeded
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// The client this context sends requests with
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Probes `index_server` and, if it challenges, obtains a token.
    ///
    /// On success the context is [`AuthState::Ready`]. On failure it is
    /// [`AuthState::Failed`], keeping whatever token it held before, and
    /// the error is returned.
    pub async fn prepare_auth(&mut self, index_server: &str) -> Result<()> {
        self.index_server = Some(index_server.to_string());
        let outcome = self.authenticate(index_server).await;
        let previous = std::mem::take(&mut self.state).into_token();
        match outcome {
            Ok(token) => {
                debug!(%index_server, scope = %self.scope, bearer = token.is_some(), "Authentication context ready");
                self.state = AuthState::Ready { token };
                Ok(())
            }
            Err(error) => {
                debug!(%index_server, scope = %self.scope, %error, "Failed to prepare authentication");
                self.state = AuthState::Failed {
                    reason: error.to_string(),
                    token: previous,
                };
                Err(error)
            }
        }
    }

    async fn authenticate(&self, index_server: &str) -> Result<Option<TokenResponse>> {
        // The version request will tell us where to go.
        let url = self.client.to_v2_base_url(index_server);
        debug!(%url, "Probing registry");
        let res = self.client.send(self.client.http().get(&url), &url).await?;

        match res.status() {
            StatusCode::OK => Ok(None),
            StatusCode::UNAUTHORIZED => {
                let header = res.headers().get(WWW_AUTHENTICATE).ok_or_else(|| {
                    OciCertError::MalformedChallenge(format!(
                        "{} answered 401 without a WWW-Authenticate header",
                        url
                    ))
                })?;
                let challenge = AuthChallenge::try_from(header)?;
                debug!(realm = %challenge.realm, service = %challenge.service, "Got Bearer challenge");
                let token =
                    fetch_token(&self.client, &challenge, &self.scope, &self.credentials).await?;
                Ok(Some(token))
            }
            actual => Err(OciCertError::UnexpectedStatus {
                url,
                actual,
                expected: StatusSet::from([StatusCode::OK, StatusCode::UNAUTHORIZED]),
            }),
        }
    }

    /// Sends a request and checks its status against `expected`.
    ///
    /// The context's token, if any, is sent as a Bearer credential. A status
    /// outside of `expected` is an [`OciCertError::UnexpectedStatus`].
    pub async fn dispatch(
        &self,
        url: &str,
        method: Method,
        body: Option<Bytes>,
        expected: &StatusSet,
    ) -> Result<reqwest::Response> {
        let res = self.send_with_token(url, method, body).await?;
        let actual = res.status();
        if expected.contains(actual) {
            Ok(res)
        } else {
            debug!(%url, %actual, %expected, "Unexpected response status");
            Err(OciCertError::UnexpectedStatus {
                url: url.to_string(),
                actual,
                expected: expected.clone(),
            })
        }
    }

    /// Sends a request with the context's token and returns the response
    /// whatever its status.
    pub async fn send_with_token(
        &self,
        url: &str,
        method: Method,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response> {
        match &self.state {
            AuthState::Unauthenticated => {
                debug!(%url, "No prepare_auth for this scope yet, sending anonymously")
            }
            AuthState::Failed { reason, .. } => {
                warn!(%url, %reason, "Sending request after a failed prepare_auth")
            }
            AuthState::Ready { .. } => {}
        }

        let mut request = self.client.http().request(method.clone(), url);
        if let Some(token) = self.state.token() {
            if token.is_expired() {
                warn!(%url, expired_at = %token.expires_at(), "Bearer token has expired, prepare_auth refreshes it");
            }
            debug!("Using bearer token authentication.");
            request = request.header(AUTHORIZATION, token.bearer_token());
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        debug!(%method, %url, "Sending request");
        self.client.send(request, url).await
    }
}
