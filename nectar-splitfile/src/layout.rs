// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

//! The single-file layout a download lives in.
//!
//! ```text
//! [block store][segment keys][segment status][general progress]
//! [main bloom][per-segment blooms][original metadata][original details]
//! [basic settings + checksum][footer]
//! ```
//!
//! All integers are big-endian. Every section that can go stale
//! independently carries its own checksum; the basic settings at the tail
//! are covered by a composite checksum that also spans the footer fields in
//! front of the end magic.

use crate::{
    bloom::{BinaryBloom, CountingBloom, SALT_LENGTH},
    ChecksumKind, Error, SegmentKeys, SlotStatus,
};

use nectar_key::Block;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

use std::io::Cursor;

/// The eight magic bytes closing a store file.
pub const END_MAGIC: u64 = 0x28b3_2d99_416e_b6ef;

/// The store format version this crate reads and writes.
pub const STORE_VERSION: u32 = 1;

/// The length, in bytes, of the footer.
pub const FOOTER_LENGTH: usize = 22;

/// The largest allowed basic-settings section, checksum included.
pub const MAX_BASIC_SETTINGS: usize = 4096;

const SPLITFILE_TYPE_REDUNDANT: u16 = 1;
const CRYPTO_ALGO_SEALED: u16 = 1;

/// Block counts of one segment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SegmentShape {
    /// Number of data blocks.
    pub data_blocks: u16,
    /// Number of check blocks.
    pub check_blocks: u16,
}

impl SegmentShape {
    /// Returns the total number of blocks.
    pub fn total(&self) -> usize {
        self.data_blocks as usize + self.check_blocks as usize
    }
}

/// Download-wide progress flags persisted in their own section.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GeneralProgress {
    flags: u32,
}

impl GeneralProgress {
    const HAS_CHECKED_DATASTORE: u32 = 1 << 0;

    /// The serialized length of the section, checksum included.
    pub fn serialized_length(checksum: ChecksumKind) -> usize {
        4 + checksum.length()
    }

    /// Whether every key has been probed against the local store already.
    pub fn has_checked_datastore(&self) -> bool {
        self.flags & Self::HAS_CHECKED_DATASTORE != 0
    }

    /// Records that the local-store probe pass completed.
    pub fn set_has_checked_datastore(&mut self) {
        self.flags |= Self::HAS_CHECKED_DATASTORE;
    }

    /// Serializes the section.
    pub fn to_bytes(self, checksum: ChecksumKind) -> Vec<u8> {
        let mut bytes = self.flags.to_be_bytes().to_vec();
        checksum.append(&mut bytes);
        bytes
    }

    /// Deserializes the section. A checksum failure resets to defaults, so
    /// the worst outcome of a stale section is redundant work.
    pub fn from_bytes(bytes: &[u8], checksum: ChecksumKind) -> Self {
        match checksum.verify(bytes, "general progress") {
            Ok(payload) if payload.len() == 4 => Self {
                flags: BigEndian::read_u32(payload),
            },
            _ => {
                log::debug!("General progress section unreadable, resetting to defaults.");
                Self::default()
            }
        }
    }
}

/// The footer closing a store file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Footer {
    /// Length of the basic-settings section, composite checksum included.
    pub settings_length: u32,
    /// Format flags, currently zero.
    pub flags: u32,
    /// Checksum kind protecting the store's sections.
    pub checksum: ChecksumKind,
    /// Store format version.
    pub version: u32,
}

impl Footer {
    /// Serializes the footer.
    pub fn to_bytes(self) -> [u8; FOOTER_LENGTH] {
        let mut bytes = [0u8; FOOTER_LENGTH];
        BigEndian::write_u32(&mut bytes[0..4], self.settings_length);
        BigEndian::write_u32(&mut bytes[4..8], self.flags);
        BigEndian::write_u16(&mut bytes[8..10], self.checksum as u16);
        BigEndian::write_u32(&mut bytes[10..14], self.version);
        BigEndian::write_u64(&mut bytes[14..22], END_MAGIC);
        bytes
    }

    fn prefix(self) -> [u8; FOOTER_LENGTH - 8] {
        let mut prefix = [0u8; FOOTER_LENGTH - 8];
        prefix.copy_from_slice(&self.to_bytes()[..FOOTER_LENGTH - 8]);
        prefix
    }

    /// Parses and validates a footer. The magic is checked before anything
    /// else; an unknown version is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != FOOTER_LENGTH {
            return Err(Error::WrongFormat);
        }
        if BigEndian::read_u64(&bytes[14..22]) != END_MAGIC {
            return Err(Error::WrongFormat);
        }

        let version = BigEndian::read_u32(&bytes[10..14]);
        if version != STORE_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        Ok(Self {
            settings_length: BigEndian::read_u32(&bytes[0..4]),
            flags: BigEndian::read_u32(&bytes[4..8]),
            checksum: ChecksumKind::try_from(BigEndian::read_u16(&bytes[8..10]))?,
            version,
        })
    }
}

/// Computed offsets and parameters of one store file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreLayout {
    checksum: ChecksumKind,
    shapes: Vec<SegmentShape>,
    data_length: u64,
    salt: [u8; SALT_LENGTH],
    max_retries: i32,
    cooldown_retries: u32,
    cooldown_time_ms: u64,
    orig_metadata_length: u64,
    orig_details_length: u64,

    block_starts: Vec<u64>,
    total_blocks: u64,
    key_offsets: Vec<u64>,
    offset_key_list: u64,
    offset_seg_status: u64,
    status_record_length: u64,
    offset_gen_progress: u64,
    offset_main_bloom: u64,
    main_bloom_length: u64,
    offset_seg_bloom: u64,
    seg_bloom_length: u64,
    offset_orig_metadata: u64,
    offset_orig_details: u64,
    offset_basic_settings: u64,
    file_length: u64,
}

impl StoreLayout {
    /// Computes the layout of a store with the given parameters.
    pub fn compute(
        shapes: Vec<SegmentShape>,
        data_length: u64,
        salt: [u8; SALT_LENGTH],
        max_retries: i32,
        cooldown_retries: u32,
        cooldown_time_ms: u64,
        orig_metadata_length: u64,
        orig_details_length: u64,
        checksum: ChecksumKind,
    ) -> Result<Self, Error> {
        if shapes.is_empty() {
            return Err(Error::StorageFormat("no segments".to_string()));
        }

        let mut block_starts = Vec::with_capacity(shapes.len());
        let mut total_blocks = 0u64;
        let mut max_segment_blocks = 0usize;

        for shape in &shapes {
            block_starts.push(total_blocks);
            total_blocks += shape.total() as u64;
            max_segment_blocks = max_segment_blocks.max(shape.total());
        }

        let offset_key_list = total_blocks * Block::DATA_LENGTH as u64;

        let mut key_offsets = Vec::with_capacity(shapes.len());
        let mut cursor = offset_key_list;
        for shape in &shapes {
            key_offsets.push(cursor);
            cursor += SegmentKeys::serialized_length(shape.data_blocks as usize, shape.check_blocks as usize, checksum)
                as u64;
        }

        let offset_seg_status = cursor;
        let status_record_length = (max_segment_blocks * SlotStatus::LENGTH + checksum.length()) as u64;
        let offset_gen_progress = offset_seg_status + status_record_length * shapes.len() as u64;

        let offset_main_bloom = offset_gen_progress + GeneralProgress::serialized_length(checksum) as u64;
        let main_bloom_length = CountingBloom::serialized_length(total_blocks as usize) as u64;

        let offset_seg_bloom = offset_main_bloom + main_bloom_length;
        let seg_bloom_length = BinaryBloom::serialized_length(max_segment_blocks) as u64;

        let offset_orig_metadata = offset_seg_bloom + seg_bloom_length * shapes.len() as u64;
        let offset_orig_details = offset_orig_metadata + orig_metadata_length;
        let offset_basic_settings = offset_orig_details + orig_details_length;

        let mut layout = Self {
            checksum,
            shapes,
            data_length,
            salt,
            max_retries,
            cooldown_retries,
            cooldown_time_ms,
            orig_metadata_length,
            orig_details_length,
            block_starts,
            total_blocks,
            key_offsets,
            offset_key_list,
            offset_seg_status,
            status_record_length,
            offset_gen_progress,
            offset_main_bloom,
            main_bloom_length,
            offset_seg_bloom,
            seg_bloom_length,
            offset_orig_metadata,
            offset_orig_details,
            offset_basic_settings,
            file_length: 0,
        };

        let settings_length = layout.settings_bytes().len() + checksum.length();
        if settings_length > MAX_BASIC_SETTINGS {
            return Err(Error::StorageFormat(format!(
                "basic settings of {} bytes exceed the {} byte cap",
                settings_length, MAX_BASIC_SETTINGS
            )));
        }

        layout.file_length = offset_basic_settings + settings_length as u64 + FOOTER_LENGTH as u64;

        Ok(layout)
    }

    /// Returns the checksum kind of the store.
    pub fn checksum(&self) -> ChecksumKind {
        self.checksum
    }

    /// Returns the segment shapes.
    pub fn shapes(&self) -> &[SegmentShape] {
        &self.shapes
    }

    /// Returns the reassembled file length, in bytes.
    pub fn data_length(&self) -> u64 {
        self.data_length
    }

    /// Returns the bloom filter salt.
    pub fn salt(&self) -> [u8; SALT_LENGTH] {
        self.salt
    }

    /// Returns the retry cap, `-1` meaning infinite.
    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Returns how many consecutive failures park a key.
    pub fn cooldown_retries(&self) -> u32 {
        self.cooldown_retries
    }

    /// Returns the cooldown duration, in milliseconds.
    pub fn cooldown_time_ms(&self) -> u64 {
        self.cooldown_time_ms
    }

    /// Returns the total number of blocks across segments.
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Returns the whole file length.
    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Returns the per-segment fixed status record length.
    pub fn status_record_length(&self) -> u64 {
        self.status_record_length
    }

    /// Returns the main bloom filter length.
    pub fn main_bloom_length(&self) -> u64 {
        self.main_bloom_length
    }

    /// Returns the per-segment bloom filter length.
    pub fn seg_bloom_length(&self) -> u64 {
        self.seg_bloom_length
    }

    /// Returns the offset of the main bloom filter.
    pub fn main_bloom_offset(&self) -> u64 {
        self.offset_main_bloom
    }

    /// Returns the offset of the original metadata section.
    pub fn orig_metadata_offset(&self) -> u64 {
        self.offset_orig_metadata
    }

    /// Returns the length of the original metadata section.
    pub fn orig_metadata_length(&self) -> u64 {
        self.orig_metadata_length
    }

    /// Returns the offset of the original details section.
    pub fn orig_details_offset(&self) -> u64 {
        self.offset_orig_details
    }

    /// Returns the length of the original details section.
    pub fn orig_details_length(&self) -> u64 {
        self.orig_details_length
    }

    /// Returns the offset of the basic settings section.
    pub fn basic_settings_offset(&self) -> u64 {
        self.offset_basic_settings
    }

    /// Returns the offset of the general progress section.
    pub fn gen_progress_offset(&self) -> u64 {
        self.offset_gen_progress
    }

    /// Returns the disk offset of a physical block slot.
    pub fn block_offset(&self, segment: usize, physical_slot: usize) -> u64 {
        (self.block_starts[segment] + physical_slot as u64) * Block::DATA_LENGTH as u64
    }

    /// Returns the disk offset of a segment's key section.
    pub fn segment_keys_offset(&self, segment: usize) -> u64 {
        self.key_offsets[segment]
    }

    /// Returns the length of a segment's key section.
    pub fn segment_keys_length(&self, segment: usize) -> usize {
        let shape = self.shapes[segment];
        SegmentKeys::serialized_length(shape.data_blocks as usize, shape.check_blocks as usize, self.checksum)
    }

    /// Returns the disk offset of a segment's status record.
    pub fn segment_status_offset(&self, segment: usize) -> u64 {
        self.offset_seg_status + self.status_record_length * segment as u64
    }

    /// Returns the disk offset of a segment's bloom filter.
    pub fn segment_bloom_offset(&self, segment: usize) -> u64 {
        self.offset_seg_bloom + self.seg_bloom_length * segment as u64
    }

    fn settings_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(256);

        bytes.write_u16::<BigEndian>(SPLITFILE_TYPE_REDUNDANT).expect("vec write");
        bytes.write_u16::<BigEndian>(CRYPTO_ALGO_SEALED).expect("vec write");
        bytes.write_u32::<BigEndian>(Block::DATA_LENGTH as u32).expect("vec write");
        bytes.write_u64::<BigEndian>(self.data_length).expect("vec write");
        bytes.extend_from_slice(&self.salt);
        bytes.write_i32::<BigEndian>(self.max_retries).expect("vec write");
        bytes.write_u32::<BigEndian>(self.cooldown_retries).expect("vec write");
        bytes.write_u64::<BigEndian>(self.cooldown_time_ms).expect("vec write");
        bytes.write_u64::<BigEndian>(self.orig_metadata_length).expect("vec write");
        bytes.write_u64::<BigEndian>(self.orig_details_length).expect("vec write");
        bytes.write_u32::<BigEndian>(self.status_record_length as u32).expect("vec write");
        bytes.write_u32::<BigEndian>(self.main_bloom_length as u32).expect("vec write");
        bytes.write_u32::<BigEndian>(self.seg_bloom_length as u32).expect("vec write");
        bytes.write_u32::<BigEndian>(self.shapes.len() as u32).expect("vec write");

        for shape in &self.shapes {
            bytes.write_u16::<BigEndian>(shape.data_blocks).expect("vec write");
            bytes.write_u16::<BigEndian>(shape.check_blocks).expect("vec write");
        }

        for offset in [
            self.offset_key_list,
            self.offset_seg_status,
            self.offset_gen_progress,
            self.offset_main_bloom,
            self.offset_seg_bloom,
            self.offset_orig_metadata,
            self.offset_orig_details,
            self.offset_basic_settings,
        ] {
            bytes.write_u64::<BigEndian>(offset).expect("vec write");
        }

        bytes
    }

    /// Serializes the tail of the store: basic settings, the composite
    /// checksum spanning settings and footer fields, and the footer itself.
    pub fn encode_tail(&self) -> Vec<u8> {
        let settings = self.settings_bytes();
        let footer = Footer {
            settings_length: (settings.len() + self.checksum.length()) as u32,
            flags: 0,
            checksum: self.checksum,
            version: STORE_VERSION,
        };

        let mut composite = settings.clone();
        composite.extend_from_slice(&footer.prefix());
        let checksum = self.checksum.checksum(&composite);

        let mut tail = settings;
        tail.extend_from_slice(&checksum);
        tail.extend_from_slice(&footer.to_bytes());

        tail
    }

    /// Parses a store layout back from its settings section.
    ///
    /// `settings_section` is the `footer.settings_length` bytes in front of
    /// the footer; the composite checksum is verified against the footer
    /// fields, then the settings are decoded and the layout recomputed. The
    /// stored offsets must match the recomputed ones and fit inside
    /// `file_length`.
    pub fn decode_tail(settings_section: &[u8], footer: &Footer, file_length: u64) -> Result<Self, Error> {
        let checksum = footer.checksum;

        if settings_section.len() < checksum.length() {
            return Err(Error::ChecksumFailed("basic settings"));
        }
        let (payload, stored) = settings_section.split_at(settings_section.len() - checksum.length());

        let mut composite = payload.to_vec();
        composite.extend_from_slice(&footer.prefix());
        if checksum.checksum(&composite) != stored {
            return Err(Error::ChecksumFailed("basic settings"));
        }

        let mut reader = Cursor::new(payload);

        let splitfile_type = reader.read_u16::<BigEndian>()?;
        if splitfile_type != SPLITFILE_TYPE_REDUNDANT {
            return Err(Error::StorageFormat(format!("unknown splitfile type {}", splitfile_type)));
        }
        let crypto_algo = reader.read_u16::<BigEndian>()?;
        if crypto_algo != CRYPTO_ALGO_SEALED {
            return Err(Error::StorageFormat(format!("unknown crypto algorithm {}", crypto_algo)));
        }
        let block_size = reader.read_u32::<BigEndian>()?;
        if block_size as usize != Block::DATA_LENGTH {
            return Err(Error::StorageFormat(format!("unsupported block size {}", block_size)));
        }

        let data_length = reader.read_u64::<BigEndian>()?;
        let mut salt = [0u8; SALT_LENGTH];
        std::io::Read::read_exact(&mut reader, &mut salt)?;
        let max_retries = reader.read_i32::<BigEndian>()?;
        let cooldown_retries = reader.read_u32::<BigEndian>()?;
        let cooldown_time_ms = reader.read_u64::<BigEndian>()?;
        let orig_metadata_length = reader.read_u64::<BigEndian>()?;
        let orig_details_length = reader.read_u64::<BigEndian>()?;
        let _status_record_length = reader.read_u32::<BigEndian>()?;
        let _main_bloom_length = reader.read_u32::<BigEndian>()?;
        let _seg_bloom_length = reader.read_u32::<BigEndian>()?;

        let segment_count = reader.read_u32::<BigEndian>()? as usize;
        let mut shapes = Vec::with_capacity(segment_count);
        for _ in 0..segment_count {
            shapes.push(SegmentShape {
                data_blocks: reader.read_u16::<BigEndian>()?,
                check_blocks: reader.read_u16::<BigEndian>()?,
            });
        }

        let mut stored_offsets = [0u64; 8];
        for offset in stored_offsets.iter_mut() {
            *offset = reader.read_u64::<BigEndian>()?;
        }

        let layout = Self::compute(
            shapes,
            data_length,
            salt,
            max_retries,
            cooldown_retries,
            cooldown_time_ms,
            orig_metadata_length,
            orig_details_length,
            checksum,
        )?;

        let recomputed = [
            layout.offset_key_list,
            layout.offset_seg_status,
            layout.offset_gen_progress,
            layout.offset_main_bloom,
            layout.offset_seg_bloom,
            layout.offset_orig_metadata,
            layout.offset_orig_details,
            layout.offset_basic_settings,
        ];
        if stored_offsets != recomputed {
            return Err(Error::StorageFormat("stored offsets disagree with layout".to_string()));
        }
        if stored_offsets.iter().any(|offset| *offset > file_length) || layout.file_length != file_length {
            return Err(Error::StorageFormat("offsets out of file bounds".to_string()));
        }

        Ok(layout)
    }
}
