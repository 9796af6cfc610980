//! Credential key resolution
//!
//! Registry credentials are indexed by hostname. The canonical public
//! registry is special: it is stored under [`INDEX_SERVER`] no matter which
//! of its aliases the caller used.

/// Key under which credentials for the canonical public registry live
pub const INDEX_SERVER: &str = "https://index.docker.io/v1/";

/// Hostname of the canonical index
pub const INDEX_HOSTNAME: &str = "index.docker.io";

/// Short name users type for the canonical registry
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Host serving the v2 API of the canonical registry
pub const DEFAULT_V2_REGISTRY: &str = "registry-1.docker.io";

/// Strip the scheme and any path from a server address.
///
/// Examples:
/// - "https://ghcr.io/v2/" -> "ghcr.io"
/// - "http://localhost:5000" -> "localhost:5000"
/// - "Registry.Example.com:443" -> "registry.example.com:443"
pub fn convert_to_hostname(server: &str) -> String {
    let trimmed = server.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);

    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_ascii_lowercase()
}

/// Whether a server address names the canonical index
pub fn is_index_server(server: &str) -> bool {
    if server == INDEX_SERVER {
        return true;
    }
    matches!(
        convert_to_hostname(server).as_str(),
        INDEX_HOSTNAME | DEFAULT_REGISTRY | DEFAULT_V2_REGISTRY
    )
}

/// Normalize a server address into the key credentials are stored under.
pub fn auth_config_key(server: &str) -> String {
    if server.trim().is_empty() || is_index_server(server) {
        INDEX_SERVER.to_string()
    } else {
        convert_to_hostname(server)
    }
}

/// Extract the registry hostname from an image reference
///
/// Examples:
/// - "ubuntu:latest" -> "docker.io"
/// - "ghcr.io/owner/repo:tag" -> "ghcr.io"
/// - "localhost:5000/image" -> "localhost:5000"
pub fn registry_from_reference(image: &str) -> String {
    let image_without_digest = image.split('@').next().unwrap_or(image);

    match image_without_digest.split_once('/') {
        Some((first, _))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            first.to_ascii_lowercase()
        }
        _ => DEFAULT_REGISTRY.to_string(),
    }
}

/// Extract the repository path from an image reference, dropping the
/// registry host, tag and digest. Official images gain the `library/` prefix.
pub fn repository_from_reference(image: &str) -> String {
    let without_digest = image.split('@').next().unwrap_or(image);
    let registry = registry_from_reference(without_digest);

    let path = match without_digest.split_once('/') {
        Some((first, rest)) if first.to_ascii_lowercase() == registry => rest,
        _ => without_digest,
    };

    // A tag is only a ':' after the last '/'
    let path = match path.rfind(':') {
        Some(idx) if !path[idx..].contains('/') => &path[..idx],
        _ => path,
    };

    if registry == DEFAULT_REGISTRY && !path.contains('/') {
        format!("library/{path}")
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_to_hostname() {
        assert_eq!(convert_to_hostname("https://ghcr.io/v2/"), "ghcr.io");
        assert_eq!(convert_to_hostname("http://localhost:5000"), "localhost:5000");
        assert_eq!(convert_to_hostname("r.test"), "r.test");
        assert_eq!(
            convert_to_hostname("Registry.Example.com:443/path"),
            "registry.example.com:443"
        );
    }

    #[test]
    fn test_index_aliases() {
        assert!(is_index_server(INDEX_SERVER));
        assert!(is_index_server("docker.io"));
        assert!(is_index_server("https://index.docker.io/v2/"));
        assert!(is_index_server("registry-1.docker.io"));
        assert!(!is_index_server("ghcr.io"));

        assert_eq!(auth_config_key("docker.io"), INDEX_SERVER);
        assert_eq!(auth_config_key(""), INDEX_SERVER);
        assert_eq!(auth_config_key("https://r.test/v2/"), "r.test");
    }

    #[test]
    fn test_registry_from_reference() {
        assert_eq!(registry_from_reference("ubuntu"), "docker.io");
        assert_eq!(registry_from_reference("ubuntu:latest"), "docker.io");
        assert_eq!(registry_from_reference("library/ubuntu"), "docker.io");
        assert_eq!(registry_from_reference("ghcr.io/owner/repo:tag"), "ghcr.io");
        assert_eq!(
            registry_from_reference("localhost:5000/image"),
            "localhost:5000"
        );
        assert_eq!(
            registry_from_reference("myregistry.com/path/to/image:v1.0"),
            "myregistry.com"
        );
    }

    #[test]
    fn test_repository_from_reference() {
        assert_eq!(repository_from_reference("ubuntu:latest"), "library/ubuntu");
        assert_eq!(repository_from_reference("owner/app"), "owner/app");
        assert_eq!(
            repository_from_reference("localhost:5000/team/app:v1"),
            "team/app"
        );
        assert_eq!(
            repository_from_reference("ghcr.io/o/r@sha256:abcd"),
            "o/r"
        );
    }
}
