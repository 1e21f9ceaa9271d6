// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    archive::{extract, ExtractedArchive, METADATA_ELEMENT},
    compression::decompress_chain,
    metadata::{ContainerType, Metadata},
    request::RequestState,
    single_block::{SingleBlockFetcher, SuccessAction},
    splitfile::fetch_splitfile,
    FetchCallback, FetchContext, FetchError, FetchErrorKind,
};

use nectar_key::{ClientKey, KeyUri};
use nectar_schedule::{ClientId, PriorityClass};

use std::sync::Arc;

/// The terminal product of a walk.
pub(crate) struct WalkOutput {
    pub(crate) data: Vec<u8>,
    pub(crate) mime_type: Option<String>,
}

enum Step {
    Continue(Metadata),
    Done(WalkOutput),
}

/// Interprets metadata documents one element at a time, fetching children
/// as the chain demands, until content (or a terminal error) falls out.
pub(crate) struct Walker {
    ctx: Arc<FetchContext>,
    request: Arc<RequestState>,
    callback: Arc<dyn FetchCallback>,
    client: ClientId,
    priority: PriorityClass,
    uri: KeyUri,
    path: Vec<String>,
    consumed: usize,
    recursion: u32,
    archive: Option<ExtractedArchive>,
}

impl Walker {
    pub(crate) fn new(
        ctx: Arc<FetchContext>,
        request: Arc<RequestState>,
        callback: Arc<dyn FetchCallback>,
        client: ClientId,
        priority: PriorityClass,
        uri: KeyUri,
    ) -> Self {
        let path = uri.path().to_vec();

        Self {
            ctx,
            request,
            callback,
            client,
            priority,
            uri,
            path,
            consumed: 0,
            recursion: 0,
            archive: None,
        }
    }

    /// Fetches the root key and walks whatever it turns out to be.
    pub(crate) async fn run(mut self) -> Result<WalkOutput, FetchError> {
        let bytes = self.fetch_block(self.uri.key().clone(), true).await?;

        if !Metadata::detect(&bytes) {
            // A bare content block with no metadata in front of it.
            return self.finish(bytes, None);
        }

        let mut current = Metadata::from_bytes(&bytes, self.ctx.config.max_metadata_size)?;

        loop {
            match self.step(current).await? {
                Step::Continue(next) => current = next,
                Step::Done(output) => return Ok(output),
            }
        }
    }

    async fn step(&mut self, current: Metadata) -> Result<Step, FetchError> {
        if self.request.is_cancelled() {
            return Err(FetchError::new(FetchErrorKind::Cancelled));
        }

        match current {
            Metadata::SimpleManifest { mut entries } => {
                // The next path component selects the child; the empty
                // component means the default document.
                if self.path.is_empty() {
                    return Err(FetchError::new(FetchErrorKind::NotEnoughPathComponents));
                }
                let name = self.path.remove(0);
                self.consumed += 1;

                match entries.remove(&name) {
                    Some(child) => Ok(Step::Continue(child)),
                    None => Err(FetchError::new(FetchErrorKind::NotInArchive)
                        .with_message(format!("no element named {:?}", name))),
                }
            }

            Metadata::ArchiveManifest { container, source } => {
                self.descend()?;
                let bytes = self.fetch_source(&source).await?;

                if self.ctx.config.return_archive_manifests {
                    return self.finish(bytes, Some(container.mime_type().to_string())).map(Step::Done);
                }

                let archive = extract(
                    container,
                    &bytes,
                    self.ctx.config.max_temp_length,
                    self.ctx.config.max_archive_entries,
                )?;

                let manifest_bytes = archive
                    .get(METADATA_ELEMENT)
                    .ok_or_else(|| {
                        FetchError::new(FetchErrorKind::NotInArchive).with_message("archive has no manifest element")
                    })?
                    .to_vec();

                self.archive = Some(archive);

                Ok(Step::Continue(Metadata::from_bytes(
                    &manifest_bytes,
                    self.ctx.config.max_metadata_size,
                )?))
            }

            Metadata::ArchiveInternalRedirect { name, mime_type } => {
                let archive = self
                    .archive
                    .as_ref()
                    .ok_or_else(|| FetchError::new(FetchErrorKind::NotInArchive).with_message("no enclosing archive"))?;

                let data = archive
                    .get(&name)
                    .ok_or_else(|| {
                        FetchError::new(FetchErrorKind::NotInArchive).with_message(format!("no element named {:?}", name))
                    })?
                    .to_vec();

                self.finish(data, mime_type).map(Step::Done)
            }

            Metadata::MultiLevelMetadata { source } => {
                self.descend()?;
                let bytes = self.fetch_source(&source).await?;

                Ok(Step::Continue(Metadata::from_bytes(
                    &bytes,
                    self.ctx.config.max_metadata_size,
                )?))
            }

            Metadata::SimpleRedirect {
                uri,
                mime_type,
                compression,
            } => {
                // A redirect to an archive with components left to consume is
                // an archive manifest in disguise.
                if !self.path.is_empty() {
                    if let Some(container) = mime_type.as_deref().and_then(ContainerType::from_mime_type) {
                        return Ok(Step::Continue(Metadata::ArchiveManifest {
                            container,
                            source: Box::new(Metadata::SimpleRedirect {
                                uri,
                                mime_type: None,
                                compression,
                            }),
                        }));
                    }
                }

                self.descend()?;

                if let Some(mime_type) = &mime_type {
                    self.callback.on_expected_mime(mime_type);
                }

                // Any components of the target URI are consumed before what
                // remains of ours.
                let mut remaining = uri.path().to_vec();
                remaining.append(&mut self.path);
                self.path = remaining;

                let bytes = self.fetch_block(uri.key().clone(), true).await?;

                if Metadata::detect(&bytes) {
                    return Ok(Step::Continue(Metadata::from_bytes(
                        &bytes,
                        self.ctx.config.max_metadata_size,
                    )?));
                }

                let data = decompress_chain(&compression, bytes, self.ctx.config.max_output_length)?;
                self.finish(data, mime_type).map(Step::Done)
            }

            Metadata::Splitfile(splitfile) => {
                self.callback.on_expected_size(splitfile.decompressed_length);
                if let Some(mime_type) = &splitfile.mime_type {
                    self.callback.on_expected_mime(mime_type);
                }

                let data = fetch_splitfile(
                    &splitfile,
                    &self.ctx,
                    self.client,
                    self.priority,
                    &self.request,
                    &self.callback,
                )
                .await?;

                self.finish(data, splitfile.mime_type).map(Step::Done)
            }
        }
    }

    fn descend(&mut self) -> Result<(), FetchError> {
        self.recursion += 1;
        if self.recursion > self.ctx.config.max_recursion_level {
            return Err(FetchError::new(FetchErrorKind::TooMuchRecursion));
        }
        Ok(())
    }

    // Fetches the raw bytes behind a source document: a redirect's single
    // block or a whole splitfile. Used for containers and inner metadata.
    async fn fetch_source(&mut self, source: &Metadata) -> Result<Vec<u8>, FetchError> {
        match source {
            Metadata::SimpleRedirect { uri, compression, .. } => {
                let bytes = self.fetch_block(uri.key().clone(), false).await?;
                decompress_chain(compression, bytes, self.ctx.config.max_temp_length)
            }
            Metadata::Splitfile(splitfile) => {
                fetch_splitfile(
                    splitfile,
                    &self.ctx,
                    self.client,
                    self.priority,
                    &self.request,
                    &self.callback,
                )
                .await
            }
            _ => Err(FetchError::new(FetchErrorKind::InvalidMetadata).with_message("unfetchable source document")),
        }
    }

    async fn fetch_block(&self, key: ClientKey, expect_content: bool) -> Result<Vec<u8>, FetchError> {
        if self.request.is_cancelled() {
            return Err(FetchError::new(FetchErrorKind::Cancelled));
        }

        // Content-position blocks get the leaf action; blocks fetched to
        // re-enter the walk get the walker action.
        let (action, rx) = if expect_content {
            SuccessAction::leaf()
        } else {
            SuccessAction::delivery()
        };
        let fetcher = SingleBlockFetcher::new(
            self.ctx.scheduler.clone(),
            self.client,
            key,
            self.priority,
            self.ctx.config.max_retries,
            0,
            action,
        );

        self.request.attach_fetchers(std::slice::from_ref(&fetcher));
        fetcher
            .clone()
            .schedule()
            .await
            .map_err(|e| FetchError::new(FetchErrorKind::InternalError).with_message(e.to_string()))?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(FetchError::new(FetchErrorKind::Cancelled)),
        }
    }

    fn finish(&mut self, data: Vec<u8>, mime_type: Option<String>) -> Result<WalkOutput, FetchError> {
        if !self.path.is_empty() && !self.path.iter().all(String::is_empty) {
            if self.ctx.config.ignore_too_many_path_components {
                log::debug!("Ignoring {} leftover path components.", self.path.len());
            } else {
                return Err(FetchError::new(FetchErrorKind::TooManyPathComponents)
                    .with_uri(self.uri.truncated(self.consumed)));
            }
        }

        if let Some(mime_type) = &mime_type {
            if !self.ctx.config.mime_allowed(mime_type) {
                return Err(FetchError::new(FetchErrorKind::WrongMimeType).with_message(mime_type.clone()));
            }
        }

        if data.len() as u64 > self.ctx.config.max_output_length {
            return Err(FetchError::new(FetchErrorKind::TooBig).with_expected_size(data.len() as u64));
        }

        self.callback.on_finalized_metadata();

        Ok(WalkOutput { data, mime_type })
    }
}
