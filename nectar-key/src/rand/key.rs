// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    rand::bytes::{rand_bytes, rand_bytes_array},
    Block, ClientKey, ContentKey, RoutingKey,
};

/// Generates a random routing key.
pub fn rand_routing_key() -> RoutingKey {
    RoutingKey::new(rand_bytes_array())
}

/// Generates a content key and the block it addresses, sealed over random bytes.
pub fn rand_content_block(data_length: usize) -> (ContentKey, Block) {
    ContentKey::encode(&rand_bytes(data_length)).expect("valid data length")
}

/// Generates a random client key without an addressable block.
pub fn rand_client_key() -> ClientKey {
    let mut bytes = vec![0u8; ClientKey::SERIALIZED_LENGTH];
    bytes[1..].copy_from_slice(&rand_bytes(ClientKey::SERIALIZED_LENGTH - 1));
    ClientKey::from_bytes(&bytes).expect("valid key bytes")
}
