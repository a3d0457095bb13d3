//! Destination URIs and the closed set of storage backends they select.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use url::Url;

use crate::{StorageError, StorageResult};

/// Placeholder written over passwords whenever a destination is displayed.
const REDACTED_PASSWORD: &str = "xxxxx";

/// Storage backends, selected by URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Filesystem,
    S3Compatible,
    Gcs,
    /// Process-local store; only resolvable by a registry built for tests.
    InMemory,
}

impl Backend {
    pub const ALL: [Backend; 4] = [
        Backend::S3Compatible,
        Backend::Filesystem,
        Backend::Gcs,
        Backend::InMemory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Filesystem => "filesystem",
            Backend::S3Compatible => "s3",
            Backend::Gcs => "gcs",
            Backend::InMemory => "memory",
        }
    }

    /// URI schemes handled by this backend. The empty scheme is a bare path.
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            Backend::Filesystem => &["", "file"],
            Backend::S3Compatible => &["s3", "s3+http", "s3+https"],
            Backend::Gcs => &["gs"],
            Backend::InMemory => &["memory"],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Backend::Filesystem => "File system driver.",
            Backend::S3Compatible => {
                "S3 and S3-compatible storage driver. Credentials are passed as the URI user info."
            }
            Backend::Gcs => "Google Cloud Storage driver.",
            Backend::InMemory => "In-memory driver, available to test registries only.",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        Backend::ALL
            .into_iter()
            .find(|backend| backend.schemes().contains(&scheme))
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed upload destination.
///
/// The original string is kept as the serialized form: failover and rewrite
/// prefixes are matched against it literally, credentials included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    raw: String,
    url: Url,
    backend: Backend,
}

impl Destination {
    pub fn parse(input: &str) -> StorageResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(StorageError::invalid_uri(input, "destination is empty"));
        }

        if !input.contains("://") {
            return Self::from_path(input);
        }

        let url = Url::parse(input)
            .map_err(|e| StorageError::invalid_uri(redact_raw(input), e.to_string()))?;
        let backend =
            Backend::from_scheme(url.scheme()).ok_or_else(|| StorageError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
            })?;
        if backend != Backend::Filesystem && url.host_str().is_none_or(str::is_empty) {
            return Err(StorageError::invalid_uri(
                redact_raw(input),
                "a host is required",
            ));
        }

        Ok(Self {
            raw: input.to_string(),
            url,
            backend,
        })
    }

    fn from_path(input: &str) -> StorageResult<Self> {
        let path = std::path::absolute(input)
            .map_err(|e| StorageError::invalid_uri(input, e.to_string()))?;
        let url = Url::from_file_path(&path)
            .map_err(|()| StorageError::invalid_uri(input, "not a usable filesystem path"))?;
        Ok(Self {
            raw: input.to_string(),
            url,
            backend: Backend::Filesystem,
        })
    }

    /// The destination exactly as it was given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Last path segment, without query or fragment.
    pub fn file_name(&self) -> Option<&str> {
        self.url
            .path()
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
    }

    pub fn extension(&self) -> Option<&str> {
        self.file_name()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }

    /// Local path for filesystem destinations.
    pub fn local_path(&self) -> Option<PathBuf> {
        match self.backend {
            Backend::Filesystem => self.url.to_file_path().ok(),
            _ => None,
        }
    }

    /// Serialized form with any password masked.
    pub fn redacted(&self) -> String {
        match self.backend {
            Backend::Filesystem if !self.raw.contains("://") => self.raw.clone(),
            _ if self.url.password().is_some() => {
                let mut url = self.url.clone();
                // Only fails for cannot-be-a-base URLs, which never carry a password.
                let _ = url.set_password(Some(REDACTED_PASSWORD));
                url.to_string()
            }
            _ => self.url.to_string(),
        }
    }

    /// Resolve `relative` against this destination, keeping backend and credentials.
    pub fn join(&self, relative: &str) -> StorageResult<Destination> {
        let mut url = self
            .url
            .join(relative)
            .map_err(|e| StorageError::invalid_uri(self.redacted(), e.to_string()))?;
        // The query configures the store (`region`, `keyfile`), so it travels with the path.
        if url.query().is_none() {
            url.set_query(self.url.query());
        }

        let raw = if self.backend == Backend::Filesystem && !self.raw.contains("://") {
            url.to_file_path()
                .map_err(|()| {
                    StorageError::invalid_uri(url.to_string(), "not a usable filesystem path")
                })?
                .display()
                .to_string()
        } else {
            url.to_string()
        };

        Ok(Self {
            raw,
            url,
            backend: self.backend,
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl std::str::FromStr for Destination {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Destination::parse(s)
    }
}

/// Mask the password of a URI string that could not be parsed.
fn redact_raw(input: &str) -> String {
    let Some((scheme, rest)) = input.split_once("://") else {
        return input.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return input.to_string();
    };
    match rest[..at].split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:{REDACTED_PASSWORD}{}", &rest[at..]),
        None => input.to_string(),
    }
}
