//! Shared transport and configuration for talking to a registry under test
//!
//! A [`Client`] owns the HTTP connection pool and is cheap to clone. Every
//! scenario creates its own [`RegAuthContext`] from it, so authentication
//! state is never shared between scenarios while connections are.

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, StatusCode};
use reqwest::{RequestBuilder, Url};
use tracing::{debug, trace, warn};

use crate::context::RegAuthContext;
use crate::errors::{OciCertError, Result};
use crate::scope::Scope;
use crate::status::StatusSet;

/// Header announcing the distribution API version
pub const DIST_API_VERSION_HEADER: &str = "Docker-Distribution-API-Version";

/// Value of [`DIST_API_VERSION_HEADER`] for compliant registries
pub const DIST_API_VERSION_VALUE: &str = "registry/2.0";

/// Header carrying the identifier of a blob upload session
pub const UPLOAD_UUID_HEADER: &str = "Docker-Upload-UUID";

/// Header carrying the digest of a blob or manifest
pub const CONTENT_DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Default value for `ClientConfig::request_timeout`
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The client connects to a registry and hands out authentication contexts.
///
/// Most registries answer the `/v2/` probe with a Bearer challenge. Create a
/// client once, then for every scenario create a context with
/// [`Client::auth_context`], call
/// [`prepare_auth`](RegAuthContext::prepare_auth) and dispatch requests
/// through the context.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    client: reqwest::Client,
}

impl Default for Client {
    fn default() -> Self {
        Client::new(ClientConfig::default())
    }
}

impl TryFrom<ClientConfig> for Client {
    type Error = OciCertError;

    fn try_from(config: ClientConfig) -> std::result::Result<Self, Self::Error> {
        let mut client_builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certificates)
            .timeout(config.request_timeout);

        client_builder = match () {
            #[cfg(feature = "native-tls")]
            () => client_builder.danger_accept_invalid_hostnames(config.accept_invalid_hostnames),
            #[cfg(not(feature = "native-tls"))]
            () => client_builder,
        };

        for c in &config.extra_root_certificates {
            let cert = match c.encoding {
                CertificateEncoding::Der => reqwest::Certificate::from_der(c.data.as_slice()),
                CertificateEncoding::Pem => reqwest::Certificate::from_pem(c.data.as_slice()),
            }
            .map_err(OciCertError::ClientBuild)?;
            client_builder = client_builder.add_root_certificate(cert);
        }

        Ok(Self {
            config: Arc::new(config),
            client: client_builder.build().map_err(OciCertError::ClientBuild)?,
        })
    }
}

impl Client {
    /// Create a new client with the supplied config.
    ///
    /// If the TLS settings or extra root certificates cannot be used, this
    /// logs a warning and falls back to a transport with default TLS
    /// settings, keeping `protocol` and `request_timeout`. Use
    /// [`Client::try_from`] to get [`OciCertError::ClientBuild`] instead.
    pub fn new(config: ClientConfig) -> Self {
        let protocol = config.protocol.clone();
        let request_timeout = config.request_timeout;
        Client::try_from(config).unwrap_or_else(|err| {
            warn!("Cannot create registry client from config: {:?}", err);
            warn!("Creating client with default TLS configuration");
            Self {
                config: Arc::new(ClientConfig {
                    protocol,
                    request_timeout,
                    ..Default::default()
                }),
                client: reqwest::Client::new(),
            }
        })
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Creates a fresh, unauthenticated context for `scope`
    pub fn auth_context(&self, scope: Scope) -> RegAuthContext {
        RegAuthContext::new(self.clone(), scope)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Sends `request`, bounded by the configured request timeout.
    pub(crate) async fn send(&self, request: RequestBuilder, url: &str) -> Result<reqwest::Response> {
        let after = self.config.request_timeout;
        let res = match tokio::time::timeout(after, request.send()).await {
            Ok(res) => res.map_err(|source| self.transport_error(url, source))?,
            Err(_) => {
                return Err(OciCertError::Timeout {
                    url: url.to_string(),
                    after,
                })
            }
        };
        trace!(%url, status = %res.status(), headers = ?res.headers(), "Got response");
        Ok(res)
    }

    fn transport_error(&self, url: &str, source: reqwest::Error) -> OciCertError {
        if source.is_timeout() {
            OciCertError::Timeout {
                url: url.to_string(),
                after: self.config.request_timeout,
            }
        } else {
            OciCertError::RequestFailed {
                url: url.to_string(),
                source,
            }
        }
    }

    /// Sends an unauthenticated `GET /v2/` to `index_server`.
    ///
    /// Both 200 and 401 mean the registry is up and are returned as is.
    pub async fn ping(&self, index_server: &str) -> Result<StatusCode> {
        let url = self.to_v2_base_url(index_server);
        let res = self.send(self.client.get(&url), &url).await?;
        match res.status() {
            s @ (StatusCode::OK | StatusCode::UNAUTHORIZED) => Ok(s),
            actual => Err(OciCertError::UnexpectedStatus {
                url,
                actual,
                expected: StatusSet::from([StatusCode::OK, StatusCode::UNAUTHORIZED]),
            }),
        }
    }

    /// Pings `index_server` every `poll_interval` until it answers.
    ///
    /// Returns [`OciCertError::Timeout`] if no answer arrived within
    /// `deadline`.
    pub async fn wait_until_ready(
        &self,
        index_server: &str,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Result<StatusCode> {
        let poll = async {
            // `interval` panics on a zero period.
            let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                match self.ping(index_server).await {
                    Ok(status) => return status,
                    Err(error) => debug!(%index_server, %error, "Registry is not ready yet"),
                }
            }
        };

        let status = tokio::time::timeout(deadline, poll)
            .await
            .map_err(|_| OciCertError::Timeout {
                url: self.to_v2_base_url(index_server),
                after: deadline,
            })?;
        debug!(%index_server, %status, "Registry is ready");
        Ok(status)
    }

    /// Convert an index server to the v2 API base URL.
    pub fn to_v2_base_url(&self, index_server: &str) -> String {
        format!(
            "{}://{}/v2/",
            self.config.protocol.scheme_for(index_server),
            index_server
        )
    }

    /// Convert a repository and a tag or digest to a v2 manifest URL.
    pub fn to_v2_manifest_url(&self, index_server: &str, repository: &str, reference: &str) -> String {
        format!(
            "{}{}/manifests/{}",
            self.to_v2_base_url(index_server),
            repository,
            reference
        )
    }

    /// Convert a repository and digest to a v2 blob (layer) URL.
    pub fn to_v2_blob_url(&self, index_server: &str, repository: &str, digest: &str) -> String {
        format!(
            "{}{}/blobs/{}",
            self.to_v2_base_url(index_server),
            repository,
            digest
        )
    }

    /// Convert a repository to the v2 URL starting a blob upload.
    pub fn to_v2_blob_upload_url(&self, index_server: &str, repository: &str) -> String {
        self.to_v2_blob_url(index_server, repository, "uploads/")
    }

    /// Convert an upload session to its URL, optionally closing it with `digest`.
    pub fn to_v2_blob_upload_session_url(
        &self,
        index_server: &str,
        repository: &str,
        uuid: &str,
        digest: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}{}", self.to_v2_blob_upload_url(index_server, repository), uuid);
        match digest {
            None => Ok(url),
            Some(digest) => Url::parse_with_params(&url, &[("digest", digest)])
                .map(String::from)
                .map_err(|e| OciCertError::InvalidUrl {
                    url,
                    reason: e.to_string(),
                }),
        }
    }

    /// Convert a repository to its v2 tags listing URL.
    pub fn to_list_tags_url(&self, index_server: &str, repository: &str) -> String {
        format!("{}{}/tags/list", self.to_v2_base_url(index_server), repository)
    }

    /// Convert an index server to its v2 catalog URL.
    pub fn to_catalog_url(&self, index_server: &str) -> String {
        format!("{}_catalog", self.to_v2_base_url(index_server))
    }

    /// Turns a `Location` header into an absolute URL.
    ///
    /// Registries may answer with a path only (`/v2/...`), or with a full URL.
    pub fn resolve_location(&self, index_server: &str, location: &str) -> String {
        if location.starts_with('/') {
            format!(
                "{}://{}{}",
                self.config.protocol.scheme_for(index_server),
                index_server,
                location
            )
        } else {
            location.to_string()
        }
    }
}

/// Whether the response headers announce the `registry/2.0` API version
pub fn supports_distribution_v2(headers: &HeaderMap) -> bool {
    headers
        .get(DIST_API_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == DIST_API_VERSION_VALUE)
}

/// The encoding of the certificate
#[derive(Debug, Clone)]
pub enum CertificateEncoding {
    #[allow(missing_docs)]
    Der,
    #[allow(missing_docs)]
    Pem,
}

/// A x509 certificate
#[derive(Debug, Clone)]
pub struct Certificate {
    /// Which encoding is used by the certificate
    pub encoding: CertificateEncoding,

    /// Actual certificate
    pub data: Vec<u8>,
}

/// A client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Which protocol the client should use
    pub protocol: ClientProtocol,

    /// Accept invalid hostname. Defaults to false
    #[cfg(feature = "native-tls")]
    pub accept_invalid_hostnames: bool,

    /// Accept invalid certificates. Defaults to false
    pub accept_invalid_certificates: bool,

    /// A list of extra root certificate to trust. This can be used to connect
    /// to servers using self-signed certificates
    pub extra_root_certificates: Vec<Certificate>,

    /// Deadline applied to every request: probes, token fetches, dispatches
    /// and pings.
    ///
    /// This defaults to [`DEFAULT_REQUEST_TIMEOUT`].
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: ClientProtocol::default(),
            #[cfg(feature = "native-tls")]
            accept_invalid_hostnames: false,
            accept_invalid_certificates: false,
            extra_root_certificates: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// The protocol that the client should use to connect
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClientProtocol {
    #[allow(missing_docs)]
    Http,
    #[allow(missing_docs)]
    #[default]
    Https,
    #[allow(missing_docs)]
    HttpsExcept(Vec<String>),
}

impl ClientProtocol {
    fn scheme_for(&self, registry: &str) -> &str {
        match self {
            ClientProtocol::Https => "https",
            ClientProtocol::Http => "http",
            ClientProtocol::HttpsExcept(exceptions) => {
                if exceptions.iter().any(|e| e == registry) {
                    "http"
                } else {
                    "https"
                }
            }
        }
    }
}
