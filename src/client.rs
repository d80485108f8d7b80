use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_USER_AGENT: &str = concat!("pacedload/", env!("CARGO_PKG_VERSION"));

/// Connection pool tuning for the shared HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum idle connections kept per host
    pub max_idle_per_host: usize,

    /// How long idle connections stay in the pool before cleanup
    pub idle_timeout: Duration,

    /// TCP keepalive duration
    pub tcp_keepalive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl PoolConfig {
    pub fn apply_to_builder(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        let mut builder = builder
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout);

        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        builder
    }
}

/// Configuration for building the HTTP client shared by all endpoints.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub skip_tls_verify: bool,

    /// DNS override in the form `hostname:ip:port`.
    pub resolve_target_addr: Option<String>,

    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub pool_config: Option<PoolConfig>,
}

/// Result of building the client, includes parsed headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub parsed_headers: HeaderMap,
}

/// Builds a reqwest HTTP client with the specified configuration.
pub fn build_client(
    config: &ClientConfig,
) -> Result<ClientBuildResult, Box<dyn std::error::Error + Send + Sync>> {
    let mut client_builder = reqwest::Client::builder();

    // DNS Override Configuration
    if let Some(ref resolve_str) = config.resolve_target_addr {
        if !resolve_str.is_empty() {
            client_builder = configure_dns_override(client_builder, resolve_str)?;
        } else {
            warn!("DNS override is set but empty, no override will be applied");
        }
    }

    // mTLS Configuration
    client_builder = configure_mtls(
        client_builder,
        config.client_cert_path.as_deref(),
        config.client_key_path.as_deref(),
    )?;

    // Default Headers Configuration
    let parsed_headers = configure_default_headers(config)?;
    client_builder = client_builder.default_headers(parsed_headers.clone());
    debug!(headers = ?parsed_headers, "Configured default headers");

    // Connection Pool Configuration
    let pool_config = config.pool_config.clone().unwrap_or_default();
    client_builder = pool_config.apply_to_builder(client_builder);
    debug!(
        max_idle_per_host = pool_config.max_idle_per_host,
        idle_timeout = ?pool_config.idle_timeout,
        "Connection pool configured"
    );

    // Build client with TLS settings
    let client = if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?
    } else {
        client_builder.build()?
    };

    Ok(ClientBuildResult {
        client,
        parsed_headers,
    })
}

fn configure_dns_override(
    mut client_builder: reqwest::ClientBuilder,
    resolve_str: &str,
) -> Result<reqwest::ClientBuilder, Box<dyn std::error::Error + Send + Sync>> {
    let parts: Vec<&str> = resolve_str.split(':').collect();
    if parts.len() != 3 {
        return Err(format!(
            "DNS override ('{}') is not in the expected format 'hostname:ip:port'",
            resolve_str
        )
        .into());
    }

    let hostname_to_override = parts[0].trim();
    let ip_to_resolve_to = parts[1].trim();
    let port_to_connect_to_str = parts[2].trim();

    if hostname_to_override.is_empty() {
        return Err("DNS override: hostname part cannot be empty. Format: 'hostname:ip:port'".into());
    }
    if ip_to_resolve_to.is_empty() {
        return Err(
            "DNS override: IP address part cannot be empty. Format: 'hostname:ip:port'".into(),
        );
    }

    let port_to_connect_to: u16 = port_to_connect_to_str.parse().map_err(|e| {
        format!(
            "Failed to parse port '{}' in DNS override: {}. Format: 'hostname:ip:port'",
            port_to_connect_to_str, e
        )
    })?;

    let socket_addr_str = format!("{}:{}", ip_to_resolve_to, port_to_connect_to);
    let socket_addr: SocketAddr = socket_addr_str.parse().map_err(|e| {
        format!(
            "Failed to parse IP/Port '{}' in DNS override: {}",
            socket_addr_str, e
        )
    })?;

    client_builder = client_builder.resolve(hostname_to_override, socket_addr);
    info!(
        hostname = hostname_to_override,
        addr = %socket_addr,
        "Configured DNS override"
    );

    Ok(client_builder)
}

fn read_pem(path: &str, what: &str) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
    let mut file =
        File::open(path).map_err(|e| format!("Failed to open {} file '{}': {}", what, path, e))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| format!("Failed to read {} file '{}': {}", what, path, e))?;
    Ok(buf)
}

fn configure_mtls(
    mut client_builder: reqwest::ClientBuilder,
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<reqwest::ClientBuilder, Box<dyn std::error::Error + Send + Sync>> {
    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => {
            let cert_pem_buf = read_pem(cert_path, "client certificate")?;
            let key_pem_buf = read_pem(key_path, "client key")?;

            // Validate certificate PEM
            let mut cert_pem_cursor = std::io::Cursor::new(cert_pem_buf.as_slice());
            let certs_result: Vec<_> = rustls_pemfile::certs(&mut cert_pem_cursor).collect();
            if certs_result.is_empty() {
                return Err(format!("No PEM certificates found in {}", cert_path).into());
            }
            if let Some(Err(e)) = certs_result.into_iter().find(|c| c.is_err()) {
                return Err(format!(
                    "Failed to parse PEM certificates from '{}': {}",
                    cert_path, e
                )
                .into());
            }

            // Validate private key PEM (must be PKCS#8)
            let mut key_pem_cursor = std::io::Cursor::new(key_pem_buf.as_slice());
            let keys_result: Vec<_> =
                rustls_pemfile::pkcs8_private_keys(&mut key_pem_cursor).collect();
            if keys_result.is_empty() {
                return Err(format!(
                    "No PKCS#8 private keys found in '{}'. Ensure the file contains a valid PEM-encoded PKCS#8 private key.",
                    key_path
                ).into());
            }
            if let Some(Err(e)) = keys_result.into_iter().find(|k| k.is_err()) {
                return Err(format!(
                    "Failed to parse private key from '{}' as PKCS#8: {}",
                    key_path, e
                )
                .into());
            }

            // Combine certificate PEM and key PEM into one buffer
            let mut combined_pem_buf = Vec::new();
            combined_pem_buf.extend_from_slice(&cert_pem_buf);
            if !cert_pem_buf.ends_with(b"\n") && !key_pem_buf.starts_with(b"\n") {
                combined_pem_buf.push(b'\n');
            }
            combined_pem_buf.extend_from_slice(&key_pem_buf);

            let identity = reqwest::Identity::from_pem(&combined_pem_buf).map_err(|e| {
                format!(
                    "Failed to create client identity from PEM (cert+key): {}",
                    e
                )
            })?;

            client_builder = client_builder.identity(identity);
            info!(cert = cert_path, key = key_path, "Configured mTLS client identity");
        }
        (Some(_), None) => {
            return Err("A client certificate is set, but the client key is missing for mTLS.".into());
        }
        (None, Some(_)) => {
            return Err("A client key is set, but the client certificate is missing for mTLS.".into());
        }
        (None, None) => {
            // No mTLS configured
        }
    }

    Ok(client_builder)
}

fn configure_default_headers(
    config: &ClientConfig,
) -> Result<HeaderMap, Box<dyn std::error::Error + Send + Sync>> {
    let mut parsed_headers = HeaderMap::new();

    let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    parsed_headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent)
            .map_err(|e| format!("Invalid user agent '{}': {}", user_agent, e))?,
    );

    for (name, value) in &config.headers {
        let name_str = name.trim();
        if name_str.is_empty() {
            return Err("Invalid header: header name cannot be empty.".into());
        }

        let header_name = HeaderName::from_str(name_str)
            .map_err(|e| format!("Invalid header name: {}. Name: '{}'", e, name_str))?;
        let header_value = HeaderValue::from_str(value.trim()).map_err(|e| {
            format!(
                "Invalid header value for '{}': {}. Value: '{}'",
                name_str, e, value
            )
        })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers_include_user_agent() {
        let headers = configure_default_headers(&ClientConfig::default()).unwrap();
        assert_eq!(headers.get(USER_AGENT).unwrap(), DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_custom_headers_and_user_agent() {
        let config = ClientConfig {
            user_agent: Some("bench/1.0".to_string()),
            headers: BTreeMap::from([
                ("X-Tenant".to_string(), "acme".to_string()),
                ("Accept".to_string(), " application/json ".to_string()),
            ]),
            ..Default::default()
        };

        let headers = configure_default_headers(&config).unwrap();
        assert_eq!(headers.get(USER_AGENT).unwrap(), "bench/1.0");
        assert_eq!(headers.get("x-tenant").unwrap(), "acme");
        assert_eq!(headers.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn test_invalid_header_name() {
        let config = ClientConfig {
            headers: BTreeMap::from([("Bad Header".to_string(), "x".to_string())]),
            ..Default::default()
        };
        let err = configure_default_headers(&config).unwrap_err();
        assert!(err.to_string().contains("Invalid header name"));
    }

    #[test]
    fn test_dns_override_format() {
        let builder = reqwest::Client::builder();
        assert!(configure_dns_override(builder, "example.com:127.0.0.1:8080").is_ok());

        let err = configure_dns_override(reqwest::Client::builder(), "example.com:8080")
            .unwrap_err();
        assert!(err.to_string().contains("hostname:ip:port"));

        let err = configure_dns_override(reqwest::Client::builder(), "example.com:127.0.0.1:port")
            .unwrap_err();
        assert!(err.to_string().contains("Failed to parse port"));
    }

    #[test]
    fn test_mtls_requires_both_paths() {
        let err = configure_mtls(reqwest::Client::builder(), Some("cert.pem"), None).unwrap_err();
        assert!(err.to_string().contains("client key is missing"));

        let err = configure_mtls(reqwest::Client::builder(), None, Some("key.pem")).unwrap_err();
        assert!(err.to_string().contains("client certificate is missing"));
    }

    #[test]
    fn test_mtls_rejects_empty_pem() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a pem").unwrap();
        std::fs::write(&key, "not a pem").unwrap();

        let err = configure_mtls(
            reqwest::Client::builder(),
            cert.to_str(),
            key.to_str(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("No PEM certificates"));
    }

    #[test]
    fn test_build_client_with_defaults() {
        let result = build_client(&ClientConfig::default()).unwrap();
        assert!(result.parsed_headers.contains_key(USER_AGENT));
    }
}
