use rug::Integer;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::encoding;

// How sure do we want to be that our primes are actually prime?
// We want to be 30 sure.
pub(crate) const MILLER_RABIN_ITERS: u32 = 30;

#[derive(Error, Debug)]
#[error("{value} is not prime")]
pub struct CompositeError {
    value: Integer,
}

impl CompositeError {
    pub fn value(&self) -> &Integer {
        &self.value
    }
}

/// An integer that passed a probabilistic primality test.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Prime(Integer);

impl Prime {
    /// Skips the primality test; for values known prime by construction.
    pub fn new_unchecked(value: Integer) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &Integer {
        &self.0
    }

    pub fn into_inner(self) -> Integer {
        self.0
    }

    pub fn bits(&self) -> u32 {
        self.0.significant_bits()
    }
}

pub(crate) fn is_probably_prime(value: &Integer) -> bool {
    *value > 1u8 && value.is_probably_prime(MILLER_RABIN_ITERS) != rug::integer::IsPrime::No
}

impl TryFrom<Integer> for Prime {
    type Error = CompositeError;

    fn try_from(value: Integer) -> Result<Self, Self::Error> {
        if !is_probably_prime(&value) {
            return Err(CompositeError { value });
        }
        Ok(Prime(value))
    }
}

#[cfg(test)]
impl From<u32> for Prime {
    /// Only for small constants; panics on composites.
    fn from(value: u32) -> Self {
        Prime::try_from(Integer::from(value)).expect("small constant should be prime")
    }
}

impl From<Prime> for Integer {
    fn from(prime: Prime) -> Self {
        prime.0
    }
}

impl AsRef<Integer> for Prime {
    fn as_ref(&self) -> &Integer {
        &self.0
    }
}

impl std::fmt::Display for Prime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Prime {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        encoding::hex_integer::serialize(&self.0, s)
    }
}

impl<'de> Deserialize<'de> for Prime {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = encoding::hex_integer::deserialize(d)?;
        Prime::try_from(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
use proptest::prelude::*;

#[cfg(test)]
impl Arbitrary for Prime {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop::sample::select(vec![3u32, 5, 7, 11, 13, 17, 19, 23, 29, 31])
            .prop_map(Prime::from)
            .boxed()
    }
}
