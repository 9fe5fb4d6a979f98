use once_cell::sync::Lazy;
use rug::Integer;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::encoding;

// RSA modulus from https://en.wikipedia.org/wiki/RSA_numbers#RSA-2048
static RSA2048_MODULUS: Lazy<Integer> = Lazy::new(|| {
    Integer::parse(
        "2519590847565789349402718324004839857142928212620403202777713783604366202070\
           7595556264018525880784406918290641249515082189298559149176184502808489120072\
           8449926873928072877767359714183472702618963750149718246911650776133798590957\
           0009733045974880842840179742910064245869181719511874612151517265463228221686\
           9987549182422433637259085141865462043576798423387184774447920739934236584823\
           8242811981638150106748104516603773060562016196762561338441436038339044149526\
           3443219011465754445417842402092461651572335077870774981712577246796292638635\
           6373289912154831438167899885040445364023527381951378636564391212010397122822\
           120720357",
    )
    .expect("valid decimal literal")
    .into()
});

pub const DEFAULT_GENERATOR: u32 = 65537;

static RSA2048: Lazy<Arc<RsaGroup>> = Lazy::new(|| {
    Arc::new(
        RsaGroup::new(RSA2048_MODULUS.clone(), Integer::from(DEFAULT_GENERATOR))
            .expect("RSA-2048 parameters are valid"),
    )
});

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("modulus must be an odd integer greater than 3")]
    InvalidModulus,
    #[error("generator must lie strictly between 1 and n - 1")]
    InvalidGenerator,
}

/// Public parameters of the multiplicative group of integers mod `n`.
///
/// The factorization of `n` is never known to this crate; hitting an element
/// that isn't coprime with `n` implies having factored it.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize)]
pub struct RsaGroup {
    #[serde(with = "encoding::hex_integer")]
    modulus: Integer,
    #[serde(with = "encoding::hex_integer")]
    generator: Integer,
}

impl RsaGroup {
    pub fn new(modulus: Integer, generator: Integer) -> Result<Self, Error> {
        if modulus <= 3u8 || modulus.is_even() {
            return Err(Error::InvalidModulus);
        }
        if generator <= 1u8 || generator >= modulus.clone() - 1u32 {
            return Err(Error::InvalidGenerator);
        }
        Ok(Self { modulus, generator })
    }

    /// RSA-2048 with generator 65537.
    pub fn rsa2048() -> Arc<Self> {
        Arc::clone(&RSA2048)
    }

    pub fn modulus(&self) -> &Integer {
        &self.modulus
    }

    pub fn generator(&self) -> &Integer {
        &self.generator
    }

    /// Byte width of a group element, for fixed-width encodings.
    pub fn bytes(&self) -> usize {
        self.modulus.significant_digits::<u8>()
    }

    /// Is `value` a canonical residue, i.e. in `[0, n)`?
    pub fn contains(&self, value: &Integer) -> bool {
        *value >= 0u8 && *value < self.modulus
    }

    /// `base^exp mod n` for a non-negative exponent of any size.
    pub fn pow(&self, base: &Integer, exp: &Integer) -> Integer {
        debug_assert!(*exp >= 0u8);
        Integer::from(
            base.pow_mod_ref(exp, &self.modulus)
                .expect("non-negative exponent"),
        )
    }

    /// `g^exp mod n`.
    pub fn generate(&self, exp: &Integer) -> Integer {
        self.pow(&self.generator, exp)
    }

    /// `value^-1 mod n`; `None` if `value` shares a factor with `n`.
    pub fn inverse(&self, value: &Integer) -> Option<Integer> {
        value.invert_ref(&self.modulus).map(Integer::from)
    }

    /// `base^exp mod n` where `exp` may be negative.
    pub fn pow_signed(&self, base: &Integer, exp: &Integer) -> Option<Integer> {
        if *exp >= 0u8 {
            return Some(self.pow(base, exp));
        }
        let inverse = self.inverse(base)?;
        Some(self.pow(&inverse, &Integer::from(-exp)))
    }
}
