//! Splitting image references into index server and remote name

/// The index server used when a reference does not name one
pub const DEFAULT_INDEX_SERVER: &str = "registry-1.docker.io";

/// Prefix for single-component remote names on the default index
pub const DEFAULT_REPO_PREFIX: &str = "library/";

/// Splits `reference` into `(index_server, remote_name)`.
///
/// The component before the first `/` is treated as an index server only if
/// it looks like a host: it contains a `.` or a `:`, or is `localhost`. The
/// host is kept verbatim, so `docker.io/busybox` names `docker.io`.
/// Single-component names on the default index get the `library/` prefix.
///
/// ```
/// use ocicert::split_remote_name;
///
/// assert_eq!(
///     split_remote_name("busybox"),
///     ("registry-1.docker.io".to_string(), "library/busybox".to_string())
/// );
/// assert_eq!(
///     split_remote_name("example.com:5000/foo/bar"),
///     ("example.com:5000".to_string(), "foo/bar".to_string())
/// );
/// ```
pub fn split_remote_name(reference: &str) -> (String, String) {
    let (index, remote) = match reference.split_once('/') {
        Some((host, rest)) if looks_like_host(host) => (host, rest),
        _ => (DEFAULT_INDEX_SERVER, reference),
    };

    let remote = if index == DEFAULT_INDEX_SERVER && !remote.is_empty() && !remote.contains('/') {
        format!("{}{}", DEFAULT_REPO_PREFIX, remote)
    } else {
        remote.to_string()
    };

    (index.to_string(), remote)
}

/// Returns only the index server part of [`split_remote_name`].
pub fn index_server(reference: &str) -> String {
    split_remote_name(reference).0
}

fn looks_like_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}
