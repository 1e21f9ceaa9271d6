// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{metadata::ContainerType, FetchError, FetchErrorKind};

use flate2::read::GzDecoder;
use hashbrown::HashMap;
use tar::Archive;

use std::io::Read;

/// The archive element holding the manifest metadata of the container.
pub(crate) const METADATA_ELEMENT: &str = ".metadata";

/// The extracted elements of one fetched archive container, kept for the
/// lifetime of the walk so sibling lookups do not refetch the container.
pub(crate) struct ExtractedArchive {
    elements: HashMap<String, Vec<u8>>,
}

impl ExtractedArchive {
    pub(crate) fn get(&self, name: &str) -> Option<&[u8]> {
        self.elements.get(name).map(Vec::as_slice)
    }
}

/// Extracts a fetched container. Every element is size-capped and the
/// element count is bounded, so a hostile archive cannot balloon memory.
pub(crate) fn extract(
    container: ContainerType,
    bytes: &[u8],
    max_element_size: u64,
    max_elements: usize,
) -> Result<ExtractedArchive, FetchError> {
    match container {
        ContainerType::Tar => extract_tar(bytes, max_element_size, max_elements),
        ContainerType::TarGz => {
            let mut decoder = GzDecoder::new(bytes);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| FetchError::new(FetchErrorKind::BucketError).with_message(e.to_string()))?;
            extract_tar(&decompressed, max_element_size, max_elements)
        }
    }
}

fn extract_tar(bytes: &[u8], max_element_size: u64, max_elements: usize) -> Result<ExtractedArchive, FetchError> {
    let mut archive = Archive::new(bytes);
    let mut elements = HashMap::new();

    let entries = archive
        .entries()
        .map_err(|e| FetchError::new(FetchErrorKind::InvalidMetadata).with_message(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| FetchError::new(FetchErrorKind::InvalidMetadata).with_message(e.to_string()))?;

        if elements.len() >= max_elements {
            return Err(FetchError::new(FetchErrorKind::TooBig).with_message("too many archive elements"));
        }
        if entry.size() > max_element_size {
            return Err(FetchError::new(FetchErrorKind::TooBig)
                .with_message("oversized archive element")
                .with_expected_size(entry.size()));
        }

        let name = entry
            .path()
            .map_err(|e| FetchError::new(FetchErrorKind::InvalidMetadata).with_message(e.to_string()))?
            .to_string_lossy()
            .into_owned();

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| FetchError::new(FetchErrorKind::InvalidMetadata).with_message(e.to_string()))?;

        elements.insert(name, data);
    }

    Ok(ExtractedArchive { elements })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tar(elements: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        for (name, data) in elements {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }

        builder.into_inner().unwrap()
    }

    #[test]
    fn tar_round_trip() {
        let bytes = build_tar(&[(".metadata", b"manifest bytes"), ("page.html", b"<html></html>")]);
        let archive = extract(ContainerType::Tar, &bytes, 1024, 16).unwrap();

        assert_eq!(archive.get(METADATA_ELEMENT), Some(&b"manifest bytes"[..]));
        assert_eq!(archive.get("page.html"), Some(&b"<html></html>"[..]));
        assert_eq!(archive.get("absent"), None);
    }

    #[test]
    fn oversized_element_rejected() {
        let bytes = build_tar(&[("big", &[0u8; 4096])]);

        assert!(matches!(
            extract(ContainerType::Tar, &bytes, 1024, 16).map(|_| ()).unwrap_err().kind(),
            FetchErrorKind::TooBig
        ));
    }
}
