// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{Block, BlockKind, Error, RoutingKey};

use crypto::{
    ciphers::{chacha::XChaCha20Poly1305, traits::Aead},
    hashes::{blake2b::Blake2b256, Digest},
    signatures::ed25519,
};

use core::fmt;

/// The length, in bytes, of a seal key.
const SEAL_KEY_LENGTH: usize = 32;

// Sealing is deterministic on the plaintext so that identical content maps to
// identical blocks; the nonce can then be fixed.
const SEAL_NONCE: [u8; XChaCha20Poly1305::NONCE_LENGTH] = [0u8; XChaCha20Poly1305::NONCE_LENGTH];

fn blake2b(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::default();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn seal(seal_key: &[u8; SEAL_KEY_LENGTH], data: &[u8]) -> Result<(Vec<u8>, [u8; Block::TAG_LENGTH]), Error> {
    if data.len() > Block::DATA_LENGTH {
        return Err(Error::DataTooLarge(data.len()));
    }

    let mut plaintext = vec![0u8; Block::DATA_LENGTH];
    plaintext[..data.len()].copy_from_slice(data);

    let mut payload = vec![0u8; Block::DATA_LENGTH];
    let mut tag = [0u8; Block::TAG_LENGTH];

    XChaCha20Poly1305::try_encrypt(seal_key, &SEAL_NONCE, &[], &plaintext, &mut payload, &mut tag)?;

    Ok((payload, tag))
}

fn open(seal_key: &[u8; SEAL_KEY_LENGTH], block: &Block) -> Result<Vec<u8>, Error> {
    let mut plaintext = vec![0u8; Block::DATA_LENGTH];

    XChaCha20Poly1305::try_decrypt(seal_key, &SEAL_NONCE, &[], &mut plaintext, block.payload(), block.tag())
        .map_err(|_| Error::SealFailed)?;

    plaintext.truncate(block.data_length() as usize);

    Ok(plaintext)
}

/// A key addressing a static block by the hash of its sealed payload.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct ContentKey {
    routing_key: RoutingKey,
    seal_key: [u8; SEAL_KEY_LENGTH],
}

impl ContentKey {
    /// Seals `data` into a [`Block`] and derives the [`ContentKey`] addressing it.
    ///
    /// The seal key is derived from the plaintext, so identical content seals
    /// to the identical block.
    pub fn encode(data: &[u8]) -> Result<(Self, Block), Error> {
        let seal_key = blake2b(&[data]);
        let (payload, tag) = seal(&seal_key, data)?;
        let routing_key = RoutingKey::new(blake2b(&[&tag, &payload]));

        let block = Block::new(
            BlockKind::Content,
            data.len() as u32,
            tag,
            [0u8; Block::AUTH_LENGTH],
            payload.into_boxed_slice(),
        )?;

        Ok((
            Self {
                routing_key,
                seal_key,
            },
            block,
        ))
    }

    /// Verifies that `block` is the one this key addresses and unseals it.
    pub fn decode(&self, block: &Block) -> Result<Vec<u8>, Error> {
        let routing_key = RoutingKey::new(blake2b(&[block.tag(), block.payload()]));

        if routing_key != self.routing_key {
            return Err(Error::VerificationFailed);
        }

        open(&self.seal_key, block)
    }

    /// Returns the routing key of a [`ContentKey`].
    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({})", self.routing_key)
    }
}

/// A key addressing a mutable document by a public key and a document hash.
///
/// Blocks fetched under a signed key carry an ed25519 signature over the
/// sealed payload, verified before unsealing.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct SignedKey {
    public_key: [u8; ed25519::PUBLIC_KEY_LENGTH],
    document_hash: [u8; 32],
    seal_key: [u8; SEAL_KEY_LENGTH],
    routing_key: RoutingKey,
}

impl SignedKey {
    /// Creates a [`SignedKey`] from its parts, deriving the routing key.
    pub fn new(public_key: [u8; ed25519::PUBLIC_KEY_LENGTH], document_hash: [u8; 32], seal_key: [u8; 32]) -> Self {
        let routing_key = RoutingKey::new(blake2b(&[&public_key, &document_hash]));

        Self {
            public_key,
            document_hash,
            seal_key,
            routing_key,
        }
    }

    /// Seals and signs `data`, returning the [`SignedKey`] addressing it and the block.
    pub fn encode(secret_key: &ed25519::SecretKey, document_hash: [u8; 32], data: &[u8]) -> Result<(Self, Block), Error> {
        let seal_key = blake2b(&[data]);
        let (payload, tag) = seal(&seal_key, data)?;
        let signature = secret_key.sign(&[&tag[..], &payload[..]].concat()).to_bytes();

        let key = Self::new(secret_key.public_key().to_bytes(), document_hash, seal_key);
        let block = Block::new(
            BlockKind::Signed,
            data.len() as u32,
            tag,
            signature,
            payload.into_boxed_slice(),
        )?;

        Ok((key, block))
    }

    /// Verifies the signature of `block` and unseals it.
    pub fn decode(&self, block: &Block) -> Result<Vec<u8>, Error> {
        let public_key = ed25519::PublicKey::try_from_bytes(self.public_key)?;
        let signature = ed25519::Signature::from_bytes(*block.auth());

        if !public_key.verify(&signature, &[&block.tag()[..], block.payload()].concat()) {
            return Err(Error::InvalidSignature);
        }

        open(&self.seal_key, block)
    }

    /// Returns the routing key of a [`SignedKey`].
    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    /// Returns the public key of a [`SignedKey`].
    pub fn public_key(&self) -> &[u8; ed25519::PUBLIC_KEY_LENGTH] {
        &self.public_key
    }

    /// Returns the document hash of a [`SignedKey`].
    pub fn document_hash(&self) -> &[u8; 32] {
        &self.document_hash
    }
}

impl fmt::Debug for SignedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignedKey({})", self.routing_key)
    }
}

/// A routing key plus the material needed to turn a fetched block back into
/// plaintext.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ClientKey {
    /// A static, content-addressed key.
    Content(ContentKey),
    /// A mutable, signature-addressed key.
    Signed(SignedKey),
}

impl ClientKey {
    /// The length, in bytes, of a serialized [`ClientKey`], identical for both kinds.
    pub const SERIALIZED_LENGTH: usize = 1 + 3 * 32;

    /// Returns the routing key projection of a [`ClientKey`].
    pub fn routing_key(&self) -> &RoutingKey {
        match self {
            Self::Content(key) => key.routing_key(),
            Self::Signed(key) => key.routing_key(),
        }
    }

    /// Verifies that `block` belongs to this key and unseals its plaintext.
    pub fn decode(&self, block: &Block) -> Result<Vec<u8>, Error> {
        match self {
            Self::Content(key) => key.decode(block),
            Self::Signed(key) => key.decode(block),
        }
    }

    /// Serializes a [`ClientKey`] into bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SERIALIZED_LENGTH);

        match self {
            Self::Content(key) => {
                bytes.push(0);
                bytes.extend_from_slice(key.routing_key.as_ref());
                bytes.extend_from_slice(&key.seal_key);
                bytes.extend_from_slice(&[0u8; 32]);
            }
            Self::Signed(key) => {
                bytes.push(1);
                bytes.extend_from_slice(&key.public_key);
                bytes.extend_from_slice(&key.document_hash);
                bytes.extend_from_slice(&key.seal_key);
            }
        }

        bytes
    }

    /// Deserializes a [`ClientKey`] from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != Self::SERIALIZED_LENGTH {
            return Err(Error::InvalidKeyLength(bytes.len()));
        }

        // Safe to unwrap because the length was checked above.
        let first: [u8; 32] = bytes[1..33].try_into().unwrap();
        let second: [u8; 32] = bytes[33..65].try_into().unwrap();
        let third: [u8; 32] = bytes[65..97].try_into().unwrap();

        Ok(match bytes[0] {
            0 => Self::Content(ContentKey {
                routing_key: RoutingKey::new(first),
                seal_key: second,
            }),
            1 => Self::Signed(SignedKey::new(first, second, third)),
            kind => return Err(Error::InvalidKeyKind(kind as u16)),
        })
    }
}

impl From<ContentKey> for ClientKey {
    fn from(key: ContentKey) -> Self {
        Self::Content(key)
    }
}

impl From<SignedKey> for ClientKey {
    fn from(key: SignedKey) -> Self {
        Self::Signed(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_round_trip() {
        let data = b"per aspera ad astra";
        let (key, block) = ContentKey::encode(data).unwrap();

        assert_eq!(block.kind(), BlockKind::Content);
        assert_eq!(block.data_length() as usize, data.len());
        assert_eq!(key.decode(&block).unwrap(), data);
    }

    #[test]
    fn content_mismatched_block() {
        let (key, _) = ContentKey::encode(b"one").unwrap();
        let (_, block) = ContentKey::encode(b"two").unwrap();

        assert!(matches!(key.decode(&block), Err(Error::VerificationFailed)));
    }

    #[test]
    fn content_convergent() {
        let (a, block_a) = ContentKey::encode(b"same bytes").unwrap();
        let (b, block_b) = ContentKey::encode(b"same bytes").unwrap();

        assert_eq!(a.routing_key(), b.routing_key());
        assert_eq!(block_a, block_b);
    }

    #[test]
    fn signed_round_trip() {
        let secret_key = ed25519::SecretKey::from_bytes([7u8; 32]);
        let document_hash = [3u8; 32];
        let data = b"mutable document";

        let (key, block) = SignedKey::encode(&secret_key, document_hash, data).unwrap();

        assert_eq!(block.kind(), BlockKind::Signed);
        assert_eq!(key.decode(&block).unwrap(), data);
    }

    #[test]
    fn signed_bad_signature() {
        let secret_key = ed25519::SecretKey::from_bytes([7u8; 32]);
        let (key, block) = SignedKey::encode(&secret_key, [3u8; 32], b"payload").unwrap();

        let mut bytes = block.to_bytes();
        // Flip a bit in the signature field.
        bytes[8 + Block::TAG_LENGTH] ^= 0x01;
        let tampered = Block::from_bytes(&bytes).unwrap();

        assert!(matches!(key.decode(&tampered), Err(Error::InvalidSignature)));
    }

    #[test]
    fn key_serialization_round_trip() {
        let (content, _) = ContentKey::encode(b"serialize me").unwrap();
        let content = ClientKey::from(content);
        assert_eq!(ClientKey::from_bytes(&content.to_bytes()).unwrap(), content);

        let secret_key = ed25519::SecretKey::from_bytes([9u8; 32]);
        let (signed, _) = SignedKey::encode(&secret_key, [1u8; 32], b"me too").unwrap();
        let signed = ClientKey::from(signed);
        assert_eq!(ClientKey::from_bytes(&signed.to_bytes()).unwrap(), signed);
    }
}
