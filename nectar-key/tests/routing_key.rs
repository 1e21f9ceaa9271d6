// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use nectar_key::{Error, RoutingKey};

use core::str::FromStr;

const ROUTING_KEY: &str = "52fdfc072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c649";
const ROUTING_KEY_INVALID_HEX: &str = "52fdfc072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64x";
const ROUTING_KEY_INVALID_LEN_TOO_SHORT: &str = "52fdfc072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c6";
const ROUTING_KEY_INVALID_LEN_TOO_LONG: &str = "52fdfc072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c64900";

#[test]
fn debug_impl() {
    let key_bytes: [u8; 32] = hex::decode(ROUTING_KEY).unwrap().try_into().unwrap();

    assert_eq!(
        format!("{:?}", RoutingKey::new(key_bytes)),
        "RoutingKey(52fdfc072182654f163f5f0f9a621d729566c74d10037c4d7bbb0407d1e2c649)"
    );
}

#[test]
fn as_ref() {
    let key_bytes: [u8; 32] = hex::decode(ROUTING_KEY).unwrap().try_into().unwrap();

    assert_eq!(RoutingKey::new(key_bytes).as_ref(), &key_bytes);
}

#[test]
fn from_str_valid() {
    RoutingKey::from_str(ROUTING_KEY).unwrap();
}

#[test]
fn from_str_invalid_hex() {
    assert!(matches!(
        RoutingKey::from_str(ROUTING_KEY_INVALID_HEX),
        Err(Error::InvalidHexadecimalChar(hex))
            if hex == ROUTING_KEY_INVALID_HEX
    ));
}

#[test]
fn from_str_invalid_len_too_short() {
    assert!(matches!(
        RoutingKey::from_str(ROUTING_KEY_INVALID_LEN_TOO_SHORT),
        Err(Error::InvalidHexadecimalLength { expected, actual })
            if expected == RoutingKey::LENGTH * 2 && actual == RoutingKey::LENGTH * 2 - 2
    ));
}

#[test]
fn from_str_invalid_len_too_long() {
    assert!(matches!(
        RoutingKey::from_str(ROUTING_KEY_INVALID_LEN_TOO_LONG),
        Err(Error::InvalidHexadecimalLength { expected, actual })
            if expected == RoutingKey::LENGTH * 2 && actual == RoutingKey::LENGTH * 2 + 2
    ));
}

#[test]
fn from_to_str_round_trip() {
    assert_eq!(RoutingKey::from_str(ROUTING_KEY).unwrap().to_string(), ROUTING_KEY);
}
