// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{ClientKey, Error};

use core::{fmt, str::FromStr};

/// The textual form of a fetchable location: a [`ClientKey`] plus the path
/// components that remain to be consumed by metadata interpretation.
///
/// ```text
/// content:<hex of serialized key>/<component>/<component>
/// signed:<hex of serialized key>/<component>
/// ```
///
/// An empty component selects the default document of a manifest.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct KeyUri {
    key: ClientKey,
    path: Vec<String>,
}

impl KeyUri {
    /// Creates a new [`KeyUri`].
    pub fn new(key: ClientKey, path: Vec<String>) -> Self {
        Self { key, path }
    }

    /// Returns the key of a [`KeyUri`].
    pub fn key(&self) -> &ClientKey {
        &self.key
    }

    /// Returns the path components of a [`KeyUri`].
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Returns a copy of this URI with different path components.
    pub fn with_path(&self, path: Vec<String>) -> Self {
        Self {
            key: self.key.clone(),
            path,
        }
    }

    /// Returns a copy of this URI truncated to the components actually
    /// consumed, for error reporting.
    pub fn truncated(&self, consumed: usize) -> Self {
        Self {
            key: self.key.clone(),
            path: self.path.iter().take(consumed).cloned().collect(),
        }
    }
}

impl FromStr for KeyUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s.split_once(':').ok_or_else(|| Error::InvalidUri(s.to_string()))?;

        let kind = match scheme {
            "content" => 0u8,
            "signed" => 1u8,
            _ => return Err(Error::InvalidUri(s.to_string())),
        };

        let mut components = rest.split('/');
        let key_hex = components.next().ok_or_else(|| Error::InvalidUri(s.to_string()))?;

        let mut key_bytes = vec![0u8; ClientKey::SERIALIZED_LENGTH];
        if key_hex.len() != (ClientKey::SERIALIZED_LENGTH - 1) * 2 {
            return Err(Error::InvalidHexadecimalLength {
                expected: (ClientKey::SERIALIZED_LENGTH - 1) * 2,
                actual: key_hex.len(),
            });
        }
        key_bytes[0] = kind;
        hex::decode_to_slice(key_hex, &mut key_bytes[1..])
            .map_err(|_| Error::InvalidHexadecimalChar(key_hex.to_string()))?;

        Ok(Self {
            key: ClientKey::from_bytes(&key_bytes)?,
            path: components.map(str::to_string).collect(),
        })
    }
}

impl fmt::Display for KeyUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.key.to_bytes();
        let scheme = match self.key {
            ClientKey::Content(_) => "content",
            ClientKey::Signed(_) => "signed",
        };

        write!(f, "{}:{}", scheme, hex::encode(&bytes[1..]))?;
        for component in &self.path {
            write!(f, "/{}", component)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ContentKey;

    #[test]
    fn round_trip() {
        let (key, _) = ContentKey::encode(b"uri target").unwrap();
        let uri = KeyUri::new(key.into(), vec!["site".to_string(), "index".to_string(), String::new()]);

        let reparsed: KeyUri = uri.to_string().parse().unwrap();

        assert_eq!(reparsed, uri);
        assert_eq!(reparsed.path(), ["site", "index", ""]);
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(matches!("updatable:00/x".parse::<KeyUri>(), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn truncated_keeps_consumed_components() {
        let (key, _) = ContentKey::encode(b"uri target").unwrap();
        let uri = KeyUri::new(key.into(), vec!["a".to_string(), "b".to_string()]);

        assert_eq!(uri.truncated(1).path(), ["a"]);
    }
}
