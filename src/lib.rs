//! Building blocks for checking OCI Distribution API v2 registries
//!
//! The crate implements the Bearer-token challenge/response flow of the
//! Docker registry token protocol and an authenticated request dispatcher on
//! top of it. Conformance scenarios create a [`RegAuthContext`] each, call
//! [`RegAuthContext::prepare_auth`] once and then send their requests through
//! [`RegAuthContext::dispatch`].
#![deny(missing_docs)]

pub mod challenge;
pub mod client;
pub mod context;
pub mod errors;
mod reference;
pub mod scope;
pub mod secrets;
pub mod status;
pub mod token;

#[doc(inline)]
pub use challenge::AuthChallenge;
#[doc(inline)]
pub use client::{Client, ClientConfig, ClientProtocol};
#[doc(inline)]
pub use context::{AuthState, RegAuthContext};
#[doc(inline)]
pub use errors::{OciCertError, Result};
#[doc(inline)]
pub use reference::{index_server, split_remote_name, DEFAULT_INDEX_SERVER, DEFAULT_REPO_PREFIX};
#[doc(inline)]
pub use scope::{RegistryOperation, Scope};
#[doc(inline)]
pub use status::StatusSet;
#[doc(inline)]
pub use token::TokenResponse;
