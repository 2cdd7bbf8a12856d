//! Token scopes as used by the Docker registry token protocol
//!
//! A scope has the form `<resource type>:<resource name>:<actions>`, for
//! example `repository:library/busybox:pull,push`.

use std::fmt;
use std::str::FromStr;

use crate::errors::OciCertError;

/// Desired operation for registry authentication
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegistryOperation {
    /// Authenticate for pull operations
    Pull,
    /// Authenticate for push operations, which also need to pull
    Push,
    /// Authenticate for deleting manifests and blobs
    Delete,
}

impl RegistryOperation {
    /// The scope actions this operation needs
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            RegistryOperation::Pull => &["pull"],
            RegistryOperation::Push => &["pull", "push"],
            RegistryOperation::Delete => &["delete"],
        }
    }
}

/// The kind of resource a scope grants access to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceType {
    /// A repository, named by its remote name
    Repository,
    /// Registry-wide resources such as the catalog
    Registry,
}

impl ResourceType {
    fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Repository => "repository",
            ResourceType::Registry => "registry",
        }
    }
}

/// The resource and actions a token is requested for.
///
/// Actions form an ordered set: duplicates are dropped and insertion order
/// is kept, so the serialized form is stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    subject: Option<(ResourceType, String)>,
    actions: Vec<String>,
}

impl Scope {
    /// A repository scope for `remote_name` with the given actions.
    ///
    /// Fails with [`OciCertError::InvalidScope`] when `remote_name` is empty
    /// or an action carries a `,` or `:`, since neither would survive
    /// serialization.
    pub fn repository<I, S>(remote_name: impl Into<String>, actions: I) -> crate::errors::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let remote_name = remote_name.into();
        if remote_name.is_empty() {
            return Err(OciCertError::InvalidScope(
                "repository scope without a remote name".to_string(),
            ));
        }
        let mut scope = Scope {
            subject: Some((ResourceType::Repository, remote_name)),
            actions: Vec::new(),
        };
        for action in actions {
            scope.push_action(action)?;
        }
        Ok(scope)
    }

    /// A repository scope with the actions needed by `operation`
    pub fn for_operation(
        remote_name: impl Into<String>,
        operation: RegistryOperation,
    ) -> crate::errors::Result<Self> {
        Scope::repository(remote_name, operation.actions().iter().copied())
    }

    /// The scope used to list the registry catalog, `registry:catalog:*`
    pub fn catalog() -> Self {
        Scope {
            subject: Some((ResourceType::Registry, "catalog".to_string())),
            actions: vec!["*".to_string()],
        }
    }

    /// A scope without any resource, used for the `/v2/` probe.
    ///
    /// It serializes to the empty string and is left out of token requests.
    pub fn none() -> Self {
        Scope {
            subject: None,
            actions: Vec::new(),
        }
    }

    /// Adds an action, unless it is empty or already present.
    ///
    /// Actions holding a `,` or `:` are rejected.
    pub fn push_action(&mut self, action: impl Into<String>) -> crate::errors::Result<()> {
        let action = action.into();
        if action.contains(&[',', ':'][..]) {
            return Err(OciCertError::InvalidScope(format!(
                "action {:?} contains a separator",
                action
            )));
        }
        if !action.is_empty() && !self.actions.contains(&action) {
            self.actions.push(action);
        }
        Ok(())
    }

    /// The resource type, if the scope names a resource
    pub fn resource_type(&self) -> Option<&ResourceType> {
        self.subject.as_ref().map(|(kind, _)| kind)
    }

    /// The remote name (or resource name), empty for [`Scope::none`]
    pub fn remote_name(&self) -> &str {
        self.subject.as_ref().map_or("", |(_, name)| name.as_str())
    }

    /// The actions, in insertion order
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Whether this scope names no resource
    pub fn is_empty(&self) -> bool {
        self.subject.is_none()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            None => Ok(()),
            Some((kind, name)) => write!(f, "{}:{}:{}", kind.as_str(), name, self.actions.join(",")),
        }
    }
}

impl FromStr for Scope {
    type Err = OciCertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Scope::none());
        }
        let malformed = || OciCertError::InvalidScope(s.to_string());

        let (kind, rest) = s.split_once(':').ok_or_else(malformed)?;
        // Resource names may carry a `:` of their own, actions never do.
        let (name, actions) = rest.rsplit_once(':').ok_or_else(malformed)?;
        let kind = match kind {
            "repository" => ResourceType::Repository,
            "registry" => ResourceType::Registry,
            _ => return Err(malformed()),
        };
        if name.is_empty() {
            return Err(malformed());
        }

        let mut scope = Scope {
            subject: Some((kind, name.to_string())),
            actions: Vec::new(),
        };
        for action in actions.split(',') {
            scope.push_action(action)?;
        }
        Ok(scope)
    }
}
