// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{gf256, Error};

/// An erasure codec over equally sized blocks.
///
/// A segment of `k` data blocks and `m` check blocks must be recoverable
/// from any `k` of the `k + m`; `encode` regenerates all check blocks from
/// the data blocks. The codec is treated as a trusted primitive by the rest
/// of the crate.
pub trait FecCodec: Send + Sync {
    /// Computes `check_count` check blocks over `data`.
    fn encode(&self, data: &[Vec<u8>], check_count: usize) -> Result<Vec<Vec<u8>>, Error>;

    /// Recovers the `data_count` data blocks from any sufficient subset of
    /// slots. `slots` holds data blocks first, then check blocks; absent
    /// blocks are `None`.
    fn decode(&self, slots: &[Option<Vec<u8>>], data_count: usize) -> Result<Vec<Vec<u8>>, Error>;

    /// The largest supported `k + m`.
    fn max_blocks(&self) -> usize;
}

/// Systematic Reed-Solomon over GF(2^8).
///
/// Slot `i` is the evaluation at point `i` of the unique polynomial of
/// degree below `k` through the data blocks, byte position by byte
/// position; recovery is Lagrange interpolation from any `k` present slots.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReedSolomonCodec;

impl ReedSolomonCodec {
    const MAX_BLOCKS: usize = 256;

    /// Creates a new [`ReedSolomonCodec`].
    pub fn new() -> Self {
        Self
    }

    /// Evaluates the polynomial through `points` at each target, one output
    /// block per target. The Lagrange coefficients only depend on the x
    /// coordinates, so they are computed once per target and applied across
    /// the whole block length.
    fn interpolate(points: &[(u8, &[u8])], targets: &[u8], block_length: usize) -> Vec<Vec<u8>> {
        let mut outputs = Vec::with_capacity(targets.len());

        for &target in targets {
            let mut output = vec![0u8; block_length];

            for (i, &(x_i, y_i)) in points.iter().enumerate() {
                let mut coefficient = 1u8;
                for (j, &(x_j, _)) in points.iter().enumerate() {
                    if i != j {
                        coefficient = gf256::mul(coefficient, gf256::div(target ^ x_j, x_i ^ x_j));
                    }
                }

                if coefficient != 0 {
                    for (out, &y) in output.iter_mut().zip(y_i) {
                        *out ^= gf256::mul(coefficient, y);
                    }
                }
            }

            outputs.push(output);
        }

        outputs
    }

    fn check_block_length(blocks: impl Iterator<Item = usize>) -> Result<usize, Error> {
        let mut length = None;

        for len in blocks {
            match length {
                None => length = Some(len),
                Some(expected) if expected != len => {
                    return Err(Error::MismatchedBlockLength {
                        expected,
                        actual: len,
                    })
                }
                _ => {}
            }
        }

        length.ok_or(Error::InsufficientBlocks { needed: 1, have: 0 })
    }
}

impl FecCodec for ReedSolomonCodec {
    fn encode(&self, data: &[Vec<u8>], check_count: usize) -> Result<Vec<Vec<u8>>, Error> {
        let k = data.len();
        if k + check_count > Self::MAX_BLOCKS {
            return Err(Error::TooManyBlocks(k + check_count));
        }

        let block_length = Self::check_block_length(data.iter().map(Vec::len))?;

        let points: Vec<(u8, &[u8])> = data.iter().enumerate().map(|(i, block)| (i as u8, block.as_slice())).collect();
        let targets: Vec<u8> = (k..k + check_count).map(|x| x as u8).collect();

        Ok(Self::interpolate(&points, &targets, block_length))
    }

    fn decode(&self, slots: &[Option<Vec<u8>>], data_count: usize) -> Result<Vec<Vec<u8>>, Error> {
        let n = slots.len();
        if n > Self::MAX_BLOCKS {
            return Err(Error::TooManyBlocks(n));
        }

        let present: Vec<(u8, &[u8])> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|block| (i as u8, block.as_slice())))
            .take(data_count)
            .collect();

        if present.len() < data_count {
            return Err(Error::InsufficientBlocks {
                needed: data_count,
                have: present.len(),
            });
        }

        let block_length = Self::check_block_length(present.iter().map(|(_, block)| block.len()))?;

        let missing: Vec<u8> = (0..data_count)
            .filter(|&i| slots[i].is_none() || !present.iter().any(|(x, _)| *x == i as u8))
            .map(|i| i as u8)
            .collect();

        let recovered = Self::interpolate(&present, &missing, block_length);
        let mut recovered = recovered.into_iter();

        let mut data = Vec::with_capacity(data_count);
        for (i, slot) in slots.iter().take(data_count).enumerate() {
            match slot {
                Some(block) if present.iter().any(|(x, _)| *x == i as u8) => data.push(block.clone()),
                _ => data.push(recovered.next().expect("missing slot not recovered")),
            }
        }

        Ok(data)
    }

    fn max_blocks(&self) -> usize {
        Self::MAX_BLOCKS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{thread_rng, Rng};

    fn rand_blocks(count: usize, length: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|_| {
                let mut block = vec![0u8; length];
                thread_rng().fill(&mut block[..]);
                block
            })
            .collect()
    }

    fn slots_from(data: &[Vec<u8>], check: &[Vec<u8>]) -> Vec<Option<Vec<u8>>> {
        data.iter().chain(check.iter()).cloned().map(Some).collect()
    }

    #[test]
    fn decode_with_no_losses_is_identity() {
        let data = rand_blocks(4, 64);
        let codec = ReedSolomonCodec::new();
        let check = codec.encode(&data, 2).unwrap();

        let decoded = codec.decode(&slots_from(&data, &check), 4).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn recovers_from_maximum_losses() {
        let codec = ReedSolomonCodec::new();
        let (k, m) = (8, 4);
        let data = rand_blocks(k, 128);
        let check = codec.encode(&data, m).unwrap();

        let mut slots = slots_from(&data, &check);
        // Knock out m slots, mixing data and check losses.
        slots[0] = None;
        slots[3] = None;
        slots[7] = None;
        slots[9] = None;

        let decoded = codec.decode(&slots, k).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn any_k_of_n_suffice() {
        let codec = ReedSolomonCodec::new();
        let (k, m) = (5, 5);
        let data = rand_blocks(k, 32);
        let check = codec.encode(&data, m).unwrap();

        for round in 0..16 {
            let mut slots = slots_from(&data, &check);
            let mut removed = 0;
            let mut i = (round * 7 + 1) % (k + m);
            while removed < m {
                if slots[i].is_some() {
                    slots[i] = None;
                    removed += 1;
                }
                i = (i + 3) % (k + m);
            }

            assert_eq!(codec.decode(&slots, k).unwrap(), data, "round {}", round);
        }
    }

    #[test]
    fn one_loss_too_many_fails() {
        let codec = ReedSolomonCodec::new();
        let (k, m) = (4, 2);
        let data = rand_blocks(k, 16);
        let check = codec.encode(&data, m).unwrap();

        let mut slots = slots_from(&data, &check);
        slots[0] = None;
        slots[1] = None;
        slots[2] = None;

        assert!(matches!(
            codec.decode(&slots, k),
            Err(Error::InsufficientBlocks { needed: 4, have: 3 })
        ));
    }

    #[test]
    fn encode_is_deterministic() {
        let codec = ReedSolomonCodec::new();
        let data = rand_blocks(3, 16);

        assert_eq!(codec.encode(&data, 3).unwrap(), codec.encode(&data, 3).unwrap());
    }

    #[test]
    fn rejects_oversized_segments() {
        let codec = ReedSolomonCodec::new();
        let data = rand_blocks(2, 8);

        assert!(matches!(codec.encode(&data, 255), Err(Error::TooManyBlocks(257))));
    }
}
