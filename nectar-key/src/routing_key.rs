// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::Error;

use core::{fmt, str::FromStr};

/// The opaque identifier a block is routed and looked up by, the BLAKE2b-256
/// hash of material that depends on the key kind.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RoutingKey([u8; Self::LENGTH]);

impl RoutingKey {
    /// The length, in bytes, of a [`RoutingKey`].
    pub const LENGTH: usize = 32;

    /// Creates a new [`RoutingKey`].
    pub fn new(bytes: [u8; Self::LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the bytes of a [`RoutingKey`].
    pub fn to_bytes(self) -> [u8; Self::LENGTH] {
        self.0
    }
}

impl From<[u8; RoutingKey::LENGTH]> for RoutingKey {
    fn from(bytes: [u8; RoutingKey::LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for RoutingKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for RoutingKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::LENGTH * 2 {
            return Err(Error::InvalidHexadecimalLength {
                expected: Self::LENGTH * 2,
                actual: s.len(),
            });
        }

        let mut bytes = [0u8; Self::LENGTH];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| Error::InvalidHexadecimalChar(s.to_string()))?;

        Ok(Self(bytes))
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoutingKey({})", self)
    }
}
