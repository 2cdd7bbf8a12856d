//! Parsing of `WWW-Authenticate` Bearer challenges

use std::convert::TryFrom;

use http::HeaderValue;
use http_auth::{parser::ChallengeParser, ChallengeRef};
use reqwest::Url;

use crate::errors::{OciCertError, Result};

/// The only authentication scheme understood by the token flow
pub const BEARER_SCHEME: &str = "Bearer";

/// A parsed `Bearer` challenge, telling the client where to ask for a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthChallenge {
    /// The token endpoint
    pub realm: Url,
    /// Name of the registry service, empty if the registry left it out
    pub service: String,
    /// Scope requested by the registry, empty if the registry left it out
    pub scope: String,
}

impl AuthChallenge {
    /// Parses a `WWW-Authenticate` header value.
    ///
    /// When several challenges are present the first `Bearer` one is used.
    pub fn parse(header: &str) -> Result<Self> {
        let mut first_scheme = None;
        for challenge in ChallengeParser::new(header) {
            let challenge = challenge.map_err(|e| {
                OciCertError::MalformedChallenge(format!("cannot parse {:?}: {:?}", header, e))
            })?;
            if challenge.scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
                return AuthChallenge::try_from(&challenge);
            }
            first_scheme.get_or_insert_with(|| challenge.scheme.to_string());
        }

        match first_scheme {
            Some(scheme) => Err(OciCertError::UnsupportedAuthScheme(scheme)),
            None => Err(OciCertError::MalformedChallenge(
                "empty authentication challenge".to_string(),
            )),
        }
    }
}

impl TryFrom<&HeaderValue> for AuthChallenge {
    type Error = OciCertError;

    fn try_from(value: &HeaderValue) -> Result<Self> {
        let header = value.to_str().map_err(|e| {
            OciCertError::MalformedChallenge(format!(
                "cannot convert header value to string: {:?}",
                e
            ))
        })?;
        AuthChallenge::parse(header)
    }
}

impl TryFrom<&ChallengeRef<'_>> for AuthChallenge {
    type Error = OciCertError;

    fn try_from(value: &ChallengeRef<'_>) -> Result<Self> {
        if !value.scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
            return Err(OciCertError::UnsupportedAuthScheme(value.scheme.to_string()));
        }
        let mut realm = None;
        let mut service = String::new();
        let mut scope = String::new();
        for (k, v) in &value.params {
            if k.eq_ignore_ascii_case("realm") {
                realm = Some(v.to_unescaped());
            } else if k.eq_ignore_ascii_case("service") {
                service = v.to_unescaped();
            } else if k.eq_ignore_ascii_case("scope") {
                scope = v.to_unescaped();
            }
        }

        let realm = realm.ok_or_else(|| {
            OciCertError::MalformedChallenge("missing required parameter realm".to_string())
        })?;
        let realm = Url::parse(&realm).map_err(|e| {
            OciCertError::MalformedChallenge(format!("realm {:?} is not a valid url: {}", realm, e))
        })?;

        Ok(AuthChallenge {
            realm,
            service,
            scope,
        })
    }
}
