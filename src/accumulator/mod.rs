use thiserror::Error;

use crate::hash_to_prime::{self, HashedPrime};

pub mod rsa;
pub mod shared;

pub use rsa::{BatchWitness, MembershipWitness, RsaAccumulator, RsaAccumulatorDigest};
pub use shared::SharedAccumulator;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Caller misuse: a value that can't be a witness or representative.
    #[error("invalid proof format: {0}")]
    InvalidProofFormat(String),
    #[error("batch contains no elements")]
    EmptyBatch,
    #[error("element 0x{} is not accumulated", hex::encode(.0))]
    NotAMember(Vec<u8>),
    #[error("element 0x{} appears more than once in the batch", hex::encode(.0))]
    DuplicateElement(Vec<u8>),
    #[error("{bits}-bit primes don't fit below a {modulus_bits}-bit modulus")]
    PrimeTooLarge { bits: u32, modulus_bits: u32 },
    #[error("batch proof generation was cancelled")]
    Cancelled,
    #[error(transparent)]
    HashToPrime(#[from] hash_to_prime::Error),
}

/// What a verifier holds: public parameters and the accumulated value.
///
/// Verification never mutates anything. `Ok(false)` means a well-formed proof
/// that doesn't check out; `Err` means the inputs were malformed.
pub trait Digest {
    type Witness;
    type Member;

    fn verify(&self, witness: &Self::Witness, member: &Self::Member) -> Result<bool, Error>;

    fn verify_batch(
        &self,
        witness: &Self::Witness,
        members: &[Self::Member],
    ) -> Result<bool, Error>;
}

/// The maintainer role: knows every accumulated element, so it can add to
/// the set and produce witnesses. Verifiers only ever see a [`Digest`].
pub trait Accumulator {
    type Digest: Digest;
    type MembershipWitness;
    type BatchWitness;

    fn digest(&self) -> &Self::Digest;

    fn add(&mut self, element: &[u8]) -> Result<HashedPrime, Error>;

    fn prove(&self, element: &[u8]) -> Result<Self::MembershipWitness, Error>;

    fn aggregate(&self, elements: &[&[u8]]) -> Result<Self::BatchWitness, Error>;
}
