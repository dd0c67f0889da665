use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OriginRejection {
    #[error("malformed Origin header")]
    Malformed,
    #[error("origin '{origin}' is not in the allowlist")]
    NotAllowed { origin: String },
}

/// Which `Origin` headers the inbound upgrader accepts.
///
/// DevTools clients (browser pages, drivers, the DevTools frontend itself)
/// send all kinds of origins, so the default accepts every one of them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OriginPolicy {
    #[default]
    AllowAll,
    /// Localhost and missing origins are always accepted; anything else must
    /// match one of the glob patterns (`*` wildcard only).
    Allowlist { patterns: Vec<String> },
}

impl OriginPolicy {
    pub fn check(&self, origin_header: Option<&str>) -> Result<(), OriginRejection> {
        match self {
            OriginPolicy::AllowAll => Ok(()),
            OriginPolicy::Allowlist { patterns } => validate_origin(origin_header, patterns),
        }
    }
}

/// Whether `origin` points at the local machine (`localhost`, `127.0.0.1`
/// or `[::1]`, any scheme, any port).
fn is_localhost(origin: &str) -> bool {
    let authority = match origin.split_once("://") {
        Some((_, rest)) => rest,
        None => origin,
    };
    let authority = authority.split('/').next().unwrap_or_default();

    let host = if let Some(v6) = authority.strip_prefix('[') {
        match v6.split_once(']') {
            Some((addr, _)) => return addr == "::1",
            None => return false,
        }
    } else if authority == "::1" {
        return true;
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
            _ => authority,
        }
    };

    host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1"
}

/// Match `value` against `pattern`, where `*` stands for any run of
/// characters (including none).
fn glob_match(pattern: &str, value: &str) -> bool {
    let Some((head, rest)) = pattern.split_once('*') else {
        return pattern == value;
    };
    let Some(mut tail) = value.strip_prefix(head) else {
        return false;
    };

    let mut pieces: Vec<&str> = rest.split('*').collect();
    // Not empty: split always yields at least one piece.
    let last = pieces.pop().unwrap_or_default();

    for piece in pieces.into_iter().filter(|p| !p.is_empty()) {
        match tail.find(piece) {
            Some(at) => tail = &tail[at + piece.len()..],
            None => return false,
        }
    }

    tail.len() >= last.len() && tail.ends_with(last)
}

/// Validate an `Origin` header against an allowlist.
///
/// A missing header is accepted (drivers usually don't send one), an empty
/// one is malformed, localhost is always accepted.
pub fn validate_origin(
    origin_header: Option<&str>,
    allowlist: &[String],
) -> Result<(), OriginRejection> {
    match origin_header {
        None => Ok(()),
        Some("") => Err(OriginRejection::Malformed),
        Some(origin) if is_localhost(origin) => Ok(()),
        Some(origin) if allowlist.iter().any(|p| glob_match(p, origin)) => Ok(()),
        Some(origin) => Err(OriginRejection::NotAllowed {
            origin: origin.to_owned(),
        }),
    }
}
