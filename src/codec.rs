// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

/// Blocks and transactions on the wire may not exceed this size.
pub const CODEC_BYTES_LIMIT: usize = 4_000_000;

fn wire_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .with_limit::<CODEC_BYTES_LIMIT>()
}

fn store_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
}

pub fn encode_to_vec<T: bincode::Encode>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::encode_to_vec(val, wire_config())
}

pub fn decode<T: bincode::Decode>(bytes: &[u8]) -> Result<T, bincode::error::DecodeError> {
    let (v, _) = bincode::decode_from_slice(bytes, wire_config())?;
    Ok(v)
}

/// Encoded byte length of a value, as counted against block size limits.
pub fn encoded_size<T: bincode::Encode>(val: &T) -> usize {
    encode_to_vec(val).map(|v| v.len()).unwrap_or(usize::MAX)
}

/// Store snapshots are not subject to the wire limit.
pub fn encode_snapshot<T: bincode::Encode>(
    val: &T,
) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::encode_to_vec(val, store_config())
}

pub fn decode_snapshot<T: bincode::Decode>(
    bytes: &[u8],
) -> Result<T, bincode::error::DecodeError> {
    let (v, _) = bincode::decode_from_slice(bytes, store_config())?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_tuples() {
        let v = (42u64, String::from("amaranth"), vec![1u8, 2, 3]);
        let bytes = encode_to_vec(&v).unwrap();
        let back: (u64, String, Vec<u8>) = decode(&bytes).unwrap();
        assert_eq!(v, back);
    }
}
