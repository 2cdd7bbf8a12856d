//! Types for working with registry access secrets
//!
//! Credentials are only ever sent to the token endpoint named by a Bearer
//! challenge. Where they come from (a credential store, the environment, a
//! test fixture) is up to the caller.

use std::fmt;

/// A method for authenticating to a token endpoint
#[derive(Clone, Default, PartialEq, Eq)]
pub enum RegistryAuth {
    /// Ask for an anonymous token
    #[default]
    Anonymous,

    /// Present HTTP Basic credentials to the token endpoint
    Basic(String, String),
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryAuth::Anonymous => f.write_str("Anonymous"),
            RegistryAuth::Basic(username, _) => f
                .debug_tuple("Basic")
                .field(username)
                .field(&"<redacted>")
                .finish(),
        }
    }
}

pub(crate) trait Authenticable {
    fn apply_authentication(self, auth: &RegistryAuth) -> Self;
}

impl Authenticable for reqwest::RequestBuilder {
    fn apply_authentication(self, auth: &RegistryAuth) -> Self {
        match auth {
            RegistryAuth::Anonymous => self,
            RegistryAuth::Basic(username, password) => self.basic_auth(username, Some(password)),
        }
    }
}
