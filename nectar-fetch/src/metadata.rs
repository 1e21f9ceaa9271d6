// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{CompressionCodec, FetchError, FetchErrorKind};

use nectar_key::{ClientKey, KeyUri};
use nectar_splitfile::SegmentKeys;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
};

/// The magic prefix distinguishing a metadata document from raw content.
pub const METADATA_MAGIC: u64 = 0xf053_b284_2d2a_4a01;

const METADATA_VERSION: u8 = 1;

const KIND_SIMPLE_REDIRECT: u8 = 0;
const KIND_SIMPLE_MANIFEST: u8 = 1;
const KIND_ARCHIVE_MANIFEST: u8 = 2;
const KIND_ARCHIVE_INTERNAL_REDIRECT: u8 = 3;
const KIND_MULTI_LEVEL: u8 = 4;
const KIND_SPLITFILE: u8 = 5;

/// The container format of an archive manifest.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ContainerType {
    /// A plain tar container.
    Tar = 0,
    /// A gzip-compressed tar container.
    TarGz = 1,
}

impl ContainerType {
    /// Returns the MIME type of this container.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Tar => "application/x-tar",
            Self::TarGz => "application/x-gtar",
        }
    }

    /// Returns the container matching a declared MIME type.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        match mime_type {
            "application/x-tar" => Some(Self::Tar),
            "application/x-gtar" => Some(Self::TarGz),
            _ => None,
        }
    }
}

/// Parameters of a splitfile, as carried by its metadata.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SplitfileMetadata {
    /// The reassembled (still compressed, if codecs are set) length.
    pub data_length: u64,
    /// The length after decompression; equals `data_length` without codecs.
    pub decompressed_length: u64,
    /// The declared MIME type, if any.
    pub mime_type: Option<String>,
    /// The decompressor chain to apply after reassembly, outermost first.
    pub compression: Vec<CompressionCodec>,
    /// The keys of every segment.
    pub segments: Vec<SegmentKeys>,
    /// Whether the splitfile requires cross-segment decoding. Not
    /// supported; interpreting such metadata is refused.
    pub cross_segment: bool,
}

/// One interpreted metadata document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Metadata {
    /// The content lives at another URI.
    SimpleRedirect {
        /// The target.
        uri: KeyUri,
        /// The declared MIME type, if any.
        mime_type: Option<String>,
        /// The decompressor chain for the target's content.
        compression: Vec<CompressionCodec>,
    },
    /// A directory of named child documents.
    SimpleManifest {
        /// The children, by name. The empty name is the default document.
        entries: BTreeMap<String, Metadata>,
    },
    /// The manifest lives inside an archive container fetched as `source`.
    ArchiveManifest {
        /// The container format.
        container: ContainerType,
        /// How to fetch the container (a redirect or a splitfile).
        source: Box<Metadata>,
    },
    /// The content is a named element of the enclosing archive.
    ArchiveInternalRedirect {
        /// The element name within the archive.
        name: String,
        /// The declared MIME type, if any.
        mime_type: Option<String>,
    },
    /// The real metadata was too large for one document and must be
    /// fetched through `source` and parsed again.
    MultiLevelMetadata {
        /// How to fetch the inner metadata bytes.
        source: Box<Metadata>,
    },
    /// The content is split into FEC-protected segments.
    Splitfile(SplitfileMetadata),
}

impl Metadata {
    /// Whether `bytes` look like a serialized metadata document.
    pub fn detect(bytes: &[u8]) -> bool {
        bytes.len() >= 8 && bytes[..8] == METADATA_MAGIC.to_be_bytes()
    }

    /// Serializes this document.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = METADATA_MAGIC.to_be_bytes().to_vec();
        bytes.push(METADATA_VERSION);
        self.encode(&mut bytes);
        bytes
    }

    fn encode(&self, bytes: &mut Vec<u8>) {
        match self {
            Self::SimpleRedirect {
                uri,
                mime_type,
                compression,
            } => {
                bytes.push(KIND_SIMPLE_REDIRECT);
                encode_uri(bytes, uri);
                encode_optional_string(bytes, mime_type.as_deref());
                encode_compression(bytes, compression);
            }
            Self::SimpleManifest { entries } => {
                bytes.push(KIND_SIMPLE_MANIFEST);
                bytes.write_u32::<BigEndian>(entries.len() as u32).expect("vec write");
                for (name, child) in entries {
                    encode_string(bytes, name);
                    child.encode(bytes);
                }
            }
            Self::ArchiveManifest { container, source } => {
                bytes.push(KIND_ARCHIVE_MANIFEST);
                bytes.push(*container as u8);
                source.encode(bytes);
            }
            Self::ArchiveInternalRedirect { name, mime_type } => {
                bytes.push(KIND_ARCHIVE_INTERNAL_REDIRECT);
                encode_string(bytes, name);
                encode_optional_string(bytes, mime_type.as_deref());
            }
            Self::MultiLevelMetadata { source } => {
                bytes.push(KIND_MULTI_LEVEL);
                source.encode(bytes);
            }
            Self::Splitfile(splitfile) => {
                bytes.push(KIND_SPLITFILE);
                bytes.push(splitfile.cross_segment as u8);
                bytes.write_u64::<BigEndian>(splitfile.data_length).expect("vec write");
                bytes
                    .write_u64::<BigEndian>(splitfile.decompressed_length)
                    .expect("vec write");
                encode_optional_string(bytes, splitfile.mime_type.as_deref());
                encode_compression(bytes, &splitfile.compression);
                bytes
                    .write_u32::<BigEndian>(splitfile.segments.len() as u32)
                    .expect("vec write");
                for segment in &splitfile.segments {
                    bytes.write_u16::<BigEndian>(segment.data().len() as u16).expect("vec write");
                    bytes.write_u16::<BigEndian>(segment.check().len() as u16).expect("vec write");
                    for key in segment.data().iter().chain(segment.check().iter()) {
                        bytes.extend_from_slice(&key.to_bytes());
                    }
                }
            }
        }
    }

    /// Parses a metadata document, enforcing `max_metadata_size` before
    /// anything is interpreted.
    pub fn from_bytes(bytes: &[u8], max_metadata_size: u64) -> Result<Self, FetchError> {
        if bytes.len() as u64 > max_metadata_size {
            return Err(FetchError::new(FetchErrorKind::TooBig)
                .with_message(format!("metadata of {} bytes", bytes.len()))
                .with_expected_size(bytes.len() as u64));
        }
        if !Self::detect(bytes) {
            return Err(FetchError::new(FetchErrorKind::InvalidMetadata).with_message("missing metadata magic"));
        }

        let mut reader = Cursor::new(&bytes[8..]);
        let version = reader.read_u8().map_err(invalid)?;
        if version != METADATA_VERSION {
            return Err(FetchError::new(FetchErrorKind::UnknownMetadata)
                .with_message(format!("metadata version {}", version)));
        }

        let document = Self::decode(&mut reader, 0)?;

        if reader.position() != (bytes.len() - 8) as u64 {
            return Err(FetchError::new(FetchErrorKind::InvalidMetadata).with_message("trailing bytes"));
        }

        Ok(document)
    }

    fn decode(reader: &mut Cursor<&[u8]>, depth: u8) -> Result<Self, FetchError> {
        // Nested documents (manifest trees, fetch sources) are bounded so a
        // hostile document cannot recurse the parser to death.
        if depth > 24 {
            return Err(FetchError::new(FetchErrorKind::TooMuchRecursion).with_message("metadata nesting"));
        }

        let kind = reader.read_u8().map_err(invalid)?;

        Ok(match kind {
            KIND_SIMPLE_REDIRECT => Self::SimpleRedirect {
                uri: decode_uri(reader)?,
                mime_type: decode_optional_string(reader)?,
                compression: decode_compression(reader)?,
            },
            KIND_SIMPLE_MANIFEST => {
                let count = reader.read_u32::<BigEndian>().map_err(invalid)?;
                if count > 64 * 1024 {
                    return Err(FetchError::new(FetchErrorKind::InvalidMetadata).with_message("oversized manifest"));
                }

                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let name = decode_string(reader)?;
                    let child = Self::decode(reader, depth + 1)?;
                    entries.insert(name, child);
                }
                Self::SimpleManifest { entries }
            }
            KIND_ARCHIVE_MANIFEST => {
                let container = match reader.read_u8().map_err(invalid)? {
                    0 => ContainerType::Tar,
                    1 => ContainerType::TarGz,
                    container => {
                        return Err(FetchError::new(FetchErrorKind::UnknownMetadata)
                            .with_message(format!("container type {}", container)))
                    }
                };
                Self::ArchiveManifest {
                    container,
                    source: Box::new(Self::decode(reader, depth + 1)?),
                }
            }
            KIND_ARCHIVE_INTERNAL_REDIRECT => Self::ArchiveInternalRedirect {
                name: decode_string(reader)?,
                mime_type: decode_optional_string(reader)?,
            },
            KIND_MULTI_LEVEL => Self::MultiLevelMetadata {
                source: Box::new(Self::decode(reader, depth + 1)?),
            },
            KIND_SPLITFILE => {
                let cross_segment = reader.read_u8().map_err(invalid)? != 0;
                let data_length = reader.read_u64::<BigEndian>().map_err(invalid)?;
                let decompressed_length = reader.read_u64::<BigEndian>().map_err(invalid)?;
                let mime_type = decode_optional_string(reader)?;
                let compression = decode_compression(reader)?;

                let segment_count = reader.read_u32::<BigEndian>().map_err(invalid)?;
                if segment_count == 0 || segment_count > 64 * 1024 {
                    return Err(
                        FetchError::new(FetchErrorKind::InvalidMetadata).with_message("bad segment count")
                    );
                }

                let mut segments = Vec::with_capacity(segment_count as usize);
                for _ in 0..segment_count {
                    let data_blocks = reader.read_u16::<BigEndian>().map_err(invalid)? as usize;
                    let check_blocks = reader.read_u16::<BigEndian>().map_err(invalid)? as usize;

                    let mut keys = Vec::with_capacity(data_blocks + check_blocks);
                    for _ in 0..data_blocks + check_blocks {
                        let mut key_bytes = [0u8; ClientKey::SERIALIZED_LENGTH];
                        reader.read_exact(&mut key_bytes).map_err(invalid)?;
                        keys.push(ClientKey::from_bytes(&key_bytes).map_err(|e| {
                            FetchError::new(FetchErrorKind::InvalidMetadata).with_message(e.to_string())
                        })?);
                    }

                    let check = keys.split_off(data_blocks);
                    segments.push(SegmentKeys::new(keys, check));
                }

                Self::Splitfile(SplitfileMetadata {
                    data_length,
                    decompressed_length,
                    mime_type,
                    compression,
                    segments,
                    cross_segment,
                })
            }
            kind => {
                return Err(FetchError::new(FetchErrorKind::UnknownMetadata).with_message(format!("kind {}", kind)))
            }
        })
    }

    /// Returns the MIME type this document declares, if any.
    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::SimpleRedirect { mime_type, .. } | Self::ArchiveInternalRedirect { mime_type, .. } => {
                mime_type.as_deref()
            }
            Self::Splitfile(splitfile) => splitfile.mime_type.as_deref(),
            _ => None,
        }
    }
}

fn invalid(error: std::io::Error) -> FetchError {
    FetchError::new(FetchErrorKind::InvalidMetadata).with_message(error.to_string())
}

fn encode_string(bytes: &mut Vec<u8>, s: &str) {
    bytes.write_u16::<BigEndian>(s.len() as u16).expect("vec write");
    bytes.extend_from_slice(s.as_bytes());
}

fn decode_string(reader: &mut Cursor<&[u8]>) -> Result<String, FetchError> {
    let length = reader.read_u16::<BigEndian>().map_err(invalid)? as usize;
    let mut buf = vec![0u8; length];
    reader.read_exact(&mut buf).map_err(invalid)?;
    String::from_utf8(buf).map_err(|e| FetchError::new(FetchErrorKind::InvalidMetadata).with_message(e.to_string()))
}

fn encode_optional_string(bytes: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            bytes.push(1);
            encode_string(bytes, s);
        }
        None => bytes.push(0),
    }
}

fn decode_optional_string(reader: &mut Cursor<&[u8]>) -> Result<Option<String>, FetchError> {
    match reader.read_u8().map_err(invalid)? {
        0 => Ok(None),
        _ => Ok(Some(decode_string(reader)?)),
    }
}

fn encode_uri(bytes: &mut Vec<u8>, uri: &KeyUri) {
    encode_string(bytes, &uri.to_string());
}

fn decode_uri(reader: &mut Cursor<&[u8]>) -> Result<KeyUri, FetchError> {
    decode_string(reader)?
        .parse()
        .map_err(|e: nectar_key::Error| FetchError::new(FetchErrorKind::InvalidMetadata).with_message(e.to_string()))
}

fn encode_compression(bytes: &mut Vec<u8>, codecs: &[CompressionCodec]) {
    bytes.push(codecs.len() as u8);
    for codec in codecs {
        bytes.push(*codec as u8);
    }
}

fn decode_compression(reader: &mut Cursor<&[u8]>) -> Result<Vec<CompressionCodec>, FetchError> {
    let count = reader.read_u8().map_err(invalid)?;
    let mut codecs = Vec::with_capacity(count as usize);

    for _ in 0..count {
        codecs.push(match reader.read_u8().map_err(invalid)? {
            1 => CompressionCodec::Gzip,
            codec => {
                return Err(
                    FetchError::new(FetchErrorKind::UnknownMetadata).with_message(format!("codec {}", codec))
                )
            }
        });
    }

    Ok(codecs)
}

#[cfg(test)]
mod tests {
    use super::*;

    use nectar_key::rand::key::rand_client_key;

    fn sample_redirect() -> Metadata {
        Metadata::SimpleRedirect {
            uri: KeyUri::new(rand_client_key(), vec!["doc".to_string()]),
            mime_type: Some("text/plain".to_string()),
            compression: vec![CompressionCodec::Gzip],
        }
    }

    #[test]
    fn round_trip_redirect() {
        let document = sample_redirect();
        let bytes = document.to_bytes();

        assert!(Metadata::detect(&bytes));
        assert_eq!(Metadata::from_bytes(&bytes, 1024 * 1024).unwrap(), document);
    }

    #[test]
    fn round_trip_manifest_tree() {
        let mut entries = BTreeMap::new();
        entries.insert(String::new(), sample_redirect());
        entries.insert(
            "sub".to_string(),
            Metadata::SimpleManifest {
                entries: BTreeMap::from([("leaf".to_string(), sample_redirect())]),
            },
        );

        let document = Metadata::SimpleManifest { entries };
        let bytes = document.to_bytes();

        assert_eq!(Metadata::from_bytes(&bytes, 1024 * 1024).unwrap(), document);
    }

    #[test]
    fn round_trip_splitfile() {
        let document = Metadata::Splitfile(SplitfileMetadata {
            data_length: 123_456,
            decompressed_length: 234_567,
            mime_type: None,
            compression: vec![],
            segments: vec![SegmentKeys::new(
                (0..3).map(|_| rand_client_key()).collect(),
                (0..2).map(|_| rand_client_key()).collect(),
            )],
            cross_segment: false,
        });

        let bytes = document.to_bytes();
        assert_eq!(Metadata::from_bytes(&bytes, 1024 * 1024).unwrap(), document);
    }

    #[test]
    fn oversized_metadata_rejected() {
        let bytes = sample_redirect().to_bytes();

        assert!(matches!(
            Metadata::from_bytes(&bytes, 8).map(|_| ()).unwrap_err().kind(),
            FetchErrorKind::TooBig
        ));
    }

    #[test]
    fn raw_content_is_not_metadata() {
        assert!(!Metadata::detect(b"just some file content"));
        assert!(matches!(
            Metadata::from_bytes(b"just some file content", 1024).map(|_| ()).unwrap_err().kind(),
            FetchErrorKind::InvalidMetadata
        ));
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut bytes = METADATA_MAGIC.to_be_bytes().to_vec();
        bytes.push(METADATA_VERSION);
        bytes.push(200);

        assert!(matches!(
            Metadata::from_bytes(&bytes, 1024).map(|_| ()).unwrap_err().kind(),
            FetchErrorKind::UnknownMetadata
        ));
    }
}
