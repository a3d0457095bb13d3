//! Prefix substitution rules: storage failover and thumbnail rewrites.

use std::fmt;
use std::str::FromStr;

use storage_driver::Destination;

use crate::{Result, UploadError};

/// Ordered `primary prefix -> replacement prefix` rules.
///
/// Matching is a literal string-prefix test against the destination as it
/// was given, credentials included. The first matching rule wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixMap {
    entries: Vec<(String, String)>,
}

impl PrefixMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Re-adding a prefix replaces its target in place.
    pub fn insert(&mut self, prefix: impl Into<String>, replacement: impl Into<String>) {
        let prefix = prefix.into();
        let replacement = replacement.into();
        match self.entries.iter_mut().find(|(p, _)| *p == prefix) {
            Some(entry) => entry.1 = replacement,
            None => self.entries.push((prefix, replacement)),
        }
    }

    /// Parse `k1=v1,k2=v2`. Only the first `=` of a pair separates key from
    /// value, so values may carry query strings.
    pub fn parse(input: &str) -> Result<Self> {
        let mut map = Self::new();
        for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| {
                    UploadError::configuration(format!(
                        "failed to parse key pairs, k1=v1,k2=v2 format required, got `{pair}`"
                    ))
                })?;
            map.insert(key, value);
        }
        Ok(map)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Substitute the first matching prefix of `uri`.
    pub fn substitute(&self, uri: &str) -> Option<String> {
        self.entries.iter().find_map(|(prefix, replacement)| {
            uri.strip_prefix(prefix.as_str())
                .map(|rest| format!("{replacement}{rest}"))
        })
    }

    /// Backup destination for a failed primary write.
    pub fn backup_for(&self, destination: &Destination) -> Result<Destination> {
        let backup = self.substitute(destination.as_str()).ok_or_else(|| {
            UploadError::configuration(format!("no backup URL found for {destination}"))
        })?;
        Destination::parse(&backup).map_err(|source| UploadError::storage(&backup, source))
    }
}

impl FromStr for PrefixMap {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PrefixMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PrefixMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}
