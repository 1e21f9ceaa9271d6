// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{FetchError, FetchErrorKind};

use flate2::read::GzDecoder;

use std::io::Read;

/// A compression codec of the decompressor chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CompressionCodec {
    /// RFC 1952 gzip.
    Gzip = 1,
}

/// Runs `data` through the decompressor chain, outermost codec first.
///
/// The size cap is enforced while streaming: a decompression bomb is cut
/// off as soon as it crosses `max_length`, not after it materialized.
pub fn decompress_chain(codecs: &[CompressionCodec], data: Vec<u8>, max_length: u64) -> Result<Vec<u8>, FetchError> {
    let mut current = data;

    for codec in codecs {
        current = decompress(*codec, &current, max_length)?;
    }

    Ok(current)
}

fn decompress(codec: CompressionCodec, data: &[u8], max_length: u64) -> Result<Vec<u8>, FetchError> {
    match codec {
        CompressionCodec::Gzip => {
            let mut decoder = GzDecoder::new(data).take(max_length + 1);
            let mut out = Vec::new();

            decoder
                .read_to_end(&mut out)
                .map_err(|e| FetchError::new(FetchErrorKind::BucketError).with_message(e.to_string()))?;

            if out.len() as u64 > max_length {
                return Err(FetchError::new(FetchErrorKind::TooBig)
                    .with_message("decompressed data over the output cap")
                    .with_expected_size(out.len() as u64));
            }

            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compress(codec: CompressionCodec, data: &[u8]) -> Vec<u8> {
        match codec {
            CompressionCodec::Gzip => {
                let mut encoder = flate2::read::GzEncoder::new(data, flate2::Compression::default());
                let mut out = Vec::new();
                encoder.read_to_end(&mut out).unwrap();
                out
            }
        }
    }

    #[test]
    fn gzip_round_trip() {
        let data = b"some highly compressible data, repeated, repeated, repeated".repeat(32);
        let compressed = compress(CompressionCodec::Gzip, &data);

        assert!(compressed.len() < data.len());
        assert_eq!(
            decompress_chain(&[CompressionCodec::Gzip], compressed, 1024 * 1024).unwrap(),
            data
        );
    }

    #[test]
    fn bomb_is_cut_off() {
        let data = vec![0u8; 1024 * 1024];
        let compressed = compress(CompressionCodec::Gzip, &data);

        assert!(matches!(
            decompress_chain(&[CompressionCodec::Gzip], compressed, 1024).map(|_| ()).unwrap_err().kind(),
            FetchErrorKind::TooBig
        ));
    }

    #[test]
    fn empty_chain_is_identity() {
        assert_eq!(decompress_chain(&[], b"as is".to_vec(), 16).unwrap(), b"as is");
    }
}
