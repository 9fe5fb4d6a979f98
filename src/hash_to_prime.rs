//! Deterministic hashing of arbitrary bytes to primes of an exact bit length.
use digest::{ExtendableOutput, Update, XofReader};
use log::trace;
use rug::integer::Order;
use rug::Integer;
use serde::{Deserialize, Serialize};
use sha3::Shake256;
use thiserror::Error;

use crate::primitives::prime::is_probably_prime;
use crate::primitives::Prime;

/// Below this, collisions between representatives stop being negligible.
pub const MIN_PRIME_BITS: u32 = 128;
pub const MAX_PRIME_BITS: u32 = 4096;

/// For `k`-bit candidates roughly one in `k * ln(2) / 2` is prime, so this
/// leaves a failure probability far below anything observable at 4096 bits.
pub const DEFAULT_MAX_ATTEMPTS: u64 = 10_000;

const DOMAIN_TAG: &[u8] = b"setproof/hash-to-prime/v1";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("no prime found after {attempts} attempts")]
    PrimeNotFound { attempts: u64 },
    #[error("prime bit length {0} is below the minimum of {MIN_PRIME_BITS}")]
    BitLengthTooSmall(u32),
    #[error("prime bit length {0} is above the maximum of {MAX_PRIME_BITS}")]
    BitLengthTooLarge(u32),
    #[error("nonce {nonce} does not yield a prime")]
    NotPrime { nonce: u64 },
}

/// A prime representative together with the attempt index that produced it.
///
/// Anyone holding the element, the bit length and the nonce can recompute the
/// prime with [`prime_from_nonce`] without repeating the search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashedPrime {
    pub prime: Prime,
    pub nonce: u64,
}

struct IntegerHasher {
    bits: u32,
    result: Vec<u8>,
}

impl IntegerHasher {
    fn new(bits: u32) -> Self {
        let digits = usize::try_from((bits + 7) / 8).expect("small");
        Self {
            bits,
            result: vec![0; digits],
        }
    }

    /// The candidate for attempt `nonce`: exactly `bits` bits, odd.
    fn candidate(&mut self, data: &[u8], nonce: u64) -> Integer {
        // Shake256 is an "extendable output function" (XOF): it gives as many
        // bytes of output as we ask for, whatever the bit length.
        let mut hasher = Shake256::default();
        hasher.update(DOMAIN_TAG);
        hasher.update(&self.bits.to_be_bytes());
        hasher.update(&nonce.to_be_bytes());
        hasher.update(data);
        hasher.finalize_xof().read(&mut self.result);

        let mut candidate = Integer::from_digits(&self.result, Order::Msf);
        candidate.keep_bits_mut(self.bits);
        candidate.set_bit(self.bits - 1, true);
        candidate.set_bit(0, true);
        candidate
    }
}

pub(crate) fn check_bits(bits: u32) -> Result<(), Error> {
    if bits < MIN_PRIME_BITS {
        return Err(Error::BitLengthTooSmall(bits));
    }
    if bits > MAX_PRIME_BITS {
        return Err(Error::BitLengthTooLarge(bits));
    }
    Ok(())
}

/// Hash `data` to a `bits`-bit prime, trying at most [`DEFAULT_MAX_ATTEMPTS`]
/// candidates.
pub fn hash_to_prime(data: &[u8], bits: u32) -> Result<HashedPrime, Error> {
    hash_to_prime_bounded(data, bits, DEFAULT_MAX_ATTEMPTS)
}

/// Hash `data` to a `bits`-bit prime, trying nonces `0..max_attempts` in order
/// and returning the first that yields a prime.
pub fn hash_to_prime_bounded(
    data: &[u8],
    bits: u32,
    max_attempts: u64,
) -> Result<HashedPrime, Error> {
    check_bits(bits)?;
    let mut hasher = IntegerHasher::new(bits);
    for nonce in 0..max_attempts {
        let candidate = hasher.candidate(data, nonce);
        if !is_probably_prime(&candidate) {
            continue;
        }
        trace!("hash_to_prime: {bits}-bit prime after {} attempts", nonce + 1);
        return Ok(HashedPrime {
            prime: Prime::new_unchecked(candidate),
            nonce,
        });
    }
    Err(Error::PrimeNotFound {
        attempts: max_attempts,
    })
}

/// Recompute the prime representative of `data` found at `nonce`.
///
/// Fails if that candidate is composite, which means the nonce didn't come
/// from [`hash_to_prime`] for this element.
pub fn prime_from_nonce(data: &[u8], bits: u32, nonce: u64) -> Result<Prime, Error> {
    check_bits(bits)?;
    let candidate = IntegerHasher::new(bits).candidate(data, nonce);
    if !is_probably_prime(&candidate) {
        return Err(Error::NotPrime { nonce });
    }
    Ok(Prime::new_unchecked(candidate))
}
