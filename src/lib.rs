#![cfg_attr(feature = "strict", deny(warnings))]
//! Membership proofs over a fixed data set.
//!
//! Two schemes are provided side by side:
//!
//! - [`primitives::merkle`]: a binary Merkle hash tree (`O(log n)` proofs).
//! - [`accumulator::rsa`]: an RSA accumulator (constant-size proofs, with
//!   batch witnesses for many elements at once).
//!
//! Elements enter the RSA accumulator through [`hash_to_prime`]. Public values
//! and proofs travel between maintainer and verifiers as [`Artifacts`].
pub mod accumulator;
pub mod artifacts;
pub mod encoding;
pub mod hash_to_prime;
pub mod primitives;
pub mod util;

pub use accumulator::{RsaAccumulator, RsaAccumulatorDigest};
pub use artifacts::Artifacts;
pub use hash_to_prime::{hash_to_prime, HashedPrime};
pub use primitives::{merkle, Prime, RsaGroup};
