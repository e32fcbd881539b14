//! Locating the node's JSON-RPC endpoint the way the Lotus tooling does:
//! `FULLNODE_API_INFO`, or the `api` and `token` files in the node's repo.
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const API_INFO_ENV: &str = "FULLNODE_API_INFO";

/// `/ip4/127.0.0.1/tcp/1234/http` and friends.
static MULTIADDR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(ip4|ip6|dns|dns4|dns6)/([^/]+)/tcp/(\d{1,5})(?:/(http|https|ws|wss))?/?$")
        .unwrap()
});

/// Resolved endpoint and credentials for the node API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiInfo {
    pub url: String,
    pub token: Option<String>,
}

#[derive(Debug)]
pub enum ApiInfoError {
    /// Failed to read a file from the node repo.
    Read { path: PathBuf, source: std::io::Error },
    /// The address is not a supported multiaddr.
    Multiaddr(String),
}

impl std::fmt::Display for ApiInfoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiInfoError::Read { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ApiInfoError::Multiaddr(addr) => write!(f, "unsupported API multiaddr '{addr}'"),
        }
    }
}

impl std::error::Error for ApiInfoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiInfoError::Read { source, .. } => Some(source),
            ApiInfoError::Multiaddr(_) => None,
        }
    }
}

/// Convert a node multiaddr into the HTTP JSON-RPC URL.
pub fn multiaddr_to_url(addr: &str) -> Result<String, ApiInfoError> {
    let caps = MULTIADDR
        .captures(addr.trim())
        .ok_or_else(|| ApiInfoError::Multiaddr(addr.to_string()))?;

    let host = &caps[2];
    let port: u16 = caps[3]
        .parse()
        .map_err(|_| ApiInfoError::Multiaddr(addr.to_string()))?;
    let scheme = match caps.get(4).map(|m| m.as_str()) {
        Some("https") | Some("wss") => "https",
        _ => "http",
    };
    let host = if &caps[1] == "ip6" {
        format!("[{host}]")
    } else {
        host.to_string()
    };

    Ok(format!("{scheme}://{host}:{port}/rpc/v0"))
}

/// Parse the `TOKEN:MULTIADDR` (or bare `MULTIADDR`) form of `FULLNODE_API_INFO`.
pub fn parse_api_info(value: &str) -> Result<ApiInfo, ApiInfoError> {
    let value = value.trim();
    let (token, addr) = match value.split_once(":/") {
        Some((token, rest)) => (Some(token.to_string()), format!("/{rest}")),
        None => (None, value.to_string()),
    };
    Ok(ApiInfo {
        url: multiaddr_to_url(&addr)?,
        token: token.filter(|t| !t.is_empty()),
    })
}

/// Read the `api` (and, if present, `token`) files from a Lotus repo directory.
pub fn from_repo(repo: &Path) -> Result<ApiInfo, ApiInfoError> {
    let api_path = repo.join("api");
    let addr = std::fs::read_to_string(&api_path).map_err(|e| ApiInfoError::Read {
        path: api_path,
        source: e,
    })?;

    let token_path = repo.join("token");
    let token = match std::fs::read_to_string(&token_path) {
        Ok(t) => Some(t.trim().to_string()).filter(|t| !t.is_empty()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(ApiInfoError::Read {
                path: token_path,
                source: e,
            })
        }
    };

    Ok(ApiInfo {
        url: multiaddr_to_url(&addr)?,
        token,
    })
}

/// Expand a leading `~` against `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Resolve the endpoint: an explicit URL wins, then `env_value`
/// (the contents of `FULLNODE_API_INFO`), then the repo files.
pub fn resolve(
    explicit_url: Option<&str>,
    explicit_token: Option<&str>,
    env_value: Option<&str>,
    repo: &Path,
) -> Result<ApiInfo, ApiInfoError> {
    let mut info = match (explicit_url, env_value) {
        (Some(url), _) => ApiInfo {
            url: url.to_string(),
            token: None,
        },
        (None, Some(env)) if !env.trim().is_empty() => parse_api_info(env)?,
        _ => from_repo(&expand_home(repo))?,
    };
    if let Some(token) = explicit_token {
        info.token = Some(token.to_string());
    }
    Ok(info)
}
