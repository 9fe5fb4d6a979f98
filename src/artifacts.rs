//! The JSON bundle a maintainer publishes and a verifier checks.
//!
//! Every integer is `0x` hex at a fixed width: group elements at the width of
//! the modulus, primes at `ceil(bits / 8)` bytes.
use std::collections::HashMap;
use std::sync::Arc;

use digest::Digest;
use log::debug;
use rug::Integer;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::accumulator::{self, MembershipWitness, RsaAccumulator, RsaAccumulatorDigest};
use crate::encoding::{self, decode_bytes, encode_bytes, encode_integer, DecodeError};
use crate::hash_to_prime::{self, prime_from_nonce};
use crate::primitives::merkle::{self, Proof, ProofStep, Root, Side, Tree};
use crate::primitives::{Prime, RsaGroup};

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error(transparent)]
    Accumulator(#[from] accumulator::Error),
    #[error(transparent)]
    Merkle(#[from] merkle::Error),
    #[error("batch index {index} is out of range for {len} elements")]
    BatchIndex { index: usize, len: usize },
}

impl From<DecodeError> for accumulator::Error {
    fn from(err: DecodeError) -> Self {
        accumulator::Error::InvalidProofFormat(err.to_string())
    }
}

fn invalid(message: impl Into<String>) -> accumulator::Error {
    accumulator::Error::InvalidProofFormat(message.into())
}

fn prime_width(bits: u32) -> usize {
    usize::try_from((bits + 7) / 8).unwrap_or(usize::MAX)
}

/// A Merkle proof as published: parallel lists of sides and sibling hashes.
///
/// Sides are `0` when the sibling sits on the left and `1` when it sits on the
/// right.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProofRecord {
    pub sides: Vec<u8>,
    pub hashes: Vec<String>,
}

impl From<&Proof> for MerkleProofRecord {
    fn from(proof: &Proof) -> Self {
        let mut record = Self::default();
        for step in proof.steps() {
            record.sides.push(step.side.into());
            record.hashes.push(encode_bytes(&step.sibling));
        }
        record
    }
}

impl TryFrom<&MerkleProofRecord> for Proof {
    type Error = DecodeError;

    fn try_from(record: &MerkleProofRecord) -> Result<Self, Self::Error> {
        if record.sides.len() != record.hashes.len() {
            return Err(DecodeError::LengthMismatch {
                sides: record.sides.len(),
                hashes: record.hashes.len(),
            });
        }
        let steps = record
            .sides
            .iter()
            .zip(&record.hashes)
            .map(|(&side, hash)| {
                Ok(ProofStep {
                    side: Side::try_from(side).map_err(DecodeError::InvalidSide)?,
                    sibling: decode_bytes(hash)?,
                })
            })
            .collect::<Result<_, DecodeError>>()?;
        Ok(Proof::new(steps))
    }
}

/// Everything published for one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub index: usize,
    pub element: String,
    pub prime: String,
    pub nonce: u64,
    pub witness: String,
    pub merkle_proof: MerkleProofRecord,
}

impl ElementRecord {
    pub fn element(&self) -> Result<Vec<u8>, DecodeError> {
        decode_bytes(&self.element)
    }

    /// Recompute the element's prime from its nonce, and check it against the
    /// published one.
    pub fn prime(&self, prime_bits: u32) -> Result<Prime, accumulator::Error> {
        let published = encoding::decode_integer_width(&self.prime, prime_width(prime_bits))?;
        let prime = prime_from_nonce(&self.element()?, prime_bits, self.nonce).map_err(
            |err| match err {
                hash_to_prime::Error::NotPrime { .. } => invalid(err.to_string()),
                other => other.into(),
            },
        )?;
        if *prime.inner() != published {
            return Err(invalid(format!(
                "published prime for element {} does not match its nonce",
                self.index
            )));
        }
        Ok(prime)
    }

    pub fn verify_membership(
        &self,
        digest: &RsaAccumulatorDigest,
        prime_bits: u32,
    ) -> Result<bool, accumulator::Error> {
        let prime = self.prime(prime_bits)?;
        let witness = encoding::decode_integer_width(&self.witness, digest.group().bytes())?;
        digest.verify(&witness, &prime)
    }

    pub fn verify_inclusion(&self, root: &Root) -> Result<bool, DecodeError> {
        let proof = Proof::try_from(&self.merkle_proof)?;
        Ok(root.verify(&self.element()?, &proof))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub indices: Vec<usize>,
    pub witness: String,
    pub primes: Vec<String>,
    /// Product of `primes`, unreduced.
    pub product: String,
}

impl BatchRecord {
    /// Check the batch witness. Each prime must be the one published for the
    /// element at the matching index.
    pub fn verify(
        &self,
        digest: &RsaAccumulatorDigest,
        elements: &[ElementRecord],
        prime_bits: u32,
    ) -> Result<bool, accumulator::Error> {
        if self.indices.is_empty() {
            return Err(accumulator::Error::EmptyBatch);
        }
        if self.indices.len() != self.primes.len() {
            return Err(invalid("batch has a different number of indices and primes"));
        }
        let mut primes = Vec::with_capacity(self.primes.len());
        for (&index, published) in self.indices.iter().zip(&self.primes) {
            let record = elements
                .get(index)
                .ok_or_else(|| invalid(format!("batch index {index} is out of range")))?;
            let prime = record.prime(prime_bits)?;
            if encoding::decode_integer(published)? != *prime.inner() {
                return Err(invalid(format!("batch prime for element {index} does not match")));
            }
            primes.push(prime);
        }
        let product = encoding::decode_integer(&self.product)?;
        if product != Integer::from(Integer::product(primes.iter().map(Prime::inner))) {
            return Err(invalid("batch product does not match its primes"));
        }
        let witness = encoding::decode_integer_width(&self.witness, digest.group().bytes())?;
        digest.verify_batch(&witness, &primes)
    }
}

/// Which proofs in a bundle failed to verify.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub merkle_failures: Vec<usize>,
    pub rsa_failures: Vec<usize>,
    pub batch: Option<bool>,
}

impl Report {
    pub fn is_ok(&self) -> bool {
        self.merkle_failures.is_empty() && self.rsa_failures.is_empty() && self.batch != Some(false)
    }
}

/// The public values a verifier needs, as exchanged between the maintainer
/// and whoever checks proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub modulus: String,
    pub generator: String,
    pub accumulator: String,
    pub prime_bits: u32,
    pub merkle_root: String,
    pub elements: Vec<ElementRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchRecord>,
}

impl Artifacts {
    /// Accumulate `elements`, build a Merkle tree over them, and publish both
    /// kinds of proof for each one. If `batch` is non-empty, also publish one
    /// witness for the elements at those indices.
    pub fn generate<E: AsRef<[u8]>>(
        group: Arc<RsaGroup>,
        prime_bits: u32,
        elements: &[E],
        batch: &[usize],
    ) -> Result<Self, GenerateError> {
        let tree = Tree::<Sha256>::build(elements)?;
        let accumulator = RsaAccumulator::import(Arc::clone(&group), prime_bits, elements)?;
        let witnesses: HashMap<&[u8], MembershipWitness> = accumulator
            .elements()
            .map(|(element, _)| element)
            .zip(accumulator.prove_all())
            .collect();

        let group_width = group.bytes();
        let prime_width = prime_width(prime_bits);
        let records = elements
            .iter()
            .zip(tree.proofs())
            .enumerate()
            .map(|(index, (element, proof))| {
                let element = element.as_ref();
                let witness = &witnesses[element];
                ElementRecord {
                    index,
                    element: encode_bytes(element),
                    prime: encode_integer(witness.prime.prime.inner(), prime_width),
                    nonce: witness.prime.nonce,
                    witness: encode_integer(&witness.witness, group_width),
                    merkle_proof: (&proof).into(),
                }
            })
            .collect();

        let batch = if batch.is_empty() {
            None
        } else {
            let chosen = batch
                .iter()
                .map(|&index| {
                    elements
                        .get(index)
                        .map(|e| e.as_ref())
                        .ok_or(GenerateError::BatchIndex {
                            index,
                            len: elements.len(),
                        })
                })
                .collect::<Result<Vec<&[u8]>, _>>()?;
            let witness = accumulator.aggregate(&chosen)?;
            Some(BatchRecord {
                indices: batch.to_vec(),
                witness: encode_integer(&witness.witness, group_width),
                primes: witness
                    .primes
                    .iter()
                    .map(|p| encode_integer(p.inner(), prime_width))
                    .collect(),
                product: encode_integer(&witness.product, 0),
            })
        };

        debug!("generated artifacts for {} elements", elements.len());
        Ok(Self {
            modulus: encode_integer(group.modulus(), group_width),
            generator: encode_integer(group.generator(), group_width),
            accumulator: encode_integer(accumulator.digest().value(), group_width),
            prime_bits,
            merkle_root: encode_bytes(tree.root().as_bytes()),
            elements: records,
            batch,
        })
    }

    pub fn group(&self) -> Result<Arc<RsaGroup>, accumulator::Error> {
        let modulus = encoding::decode_integer(&self.modulus)?;
        let generator = encoding::decode_integer(&self.generator)?;
        let group = RsaGroup::new(modulus, generator).map_err(|err| invalid(err.to_string()))?;
        Ok(Arc::new(group))
    }

    pub fn digest(&self) -> Result<RsaAccumulatorDigest, accumulator::Error> {
        let group = self.group()?;
        let value = encoding::decode_integer_width(&self.accumulator, group.bytes())?;
        RsaAccumulatorDigest::new(group, value)
    }

    pub fn merkle_root(&self) -> Result<Root, DecodeError> {
        let bytes = decode_bytes(&self.merkle_root)?;
        Root::from_bytes(&bytes).ok_or(DecodeError::WrongLength {
            expected: <Sha256 as Digest>::output_size(),
            actual: bytes.len(),
        })
    }

    /// Check every proof in the bundle.
    ///
    /// Malformed values are errors; proofs that are well-formed but wrong end
    /// up in the report.
    pub fn verify(&self) -> Result<Report, accumulator::Error> {
        let digest = self.digest()?;
        let root = self.merkle_root()?;
        let mut report = Report::default();
        for record in &self.elements {
            if !record.verify_inclusion(&root)? {
                report.merkle_failures.push(record.index);
            }
            if !record.verify_membership(&digest, self.prime_bits)? {
                report.rsa_failures.push(record.index);
            }
        }
        if let Some(batch) = &self.batch {
            report.batch = Some(batch.verify(&digest, &self.elements, self.prime_bits)?);
        }
        Ok(report)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BITS: u32 = 128;

    fn generate() -> Artifacts {
        Artifacts::generate(
            RsaGroup::rsa2048(),
            BITS,
            &["a", "b", "c", "d", "e"],
            &[3, 1],
        )
        .unwrap()
    }

    #[test]
    fn test_merkle_proof_record() {
        let (root, proofs) = merkle::build(["a", "b", "c"]).unwrap();
        let record = MerkleProofRecord::from(&proofs[0]);
        assert_eq!(record.sides, vec![1, 1]);
        assert!(record.hashes.iter().all(|h| h.len() == 2 + 64));
        let proof = Proof::try_from(&record).unwrap();
        assert!(merkle::verify(&proof, &root, b"a"));

        let mut bad = record.clone();
        bad.sides[0] = 2;
        assert_eq!(Proof::try_from(&bad), Err(DecodeError::InvalidSide(2)));
        let mut bad = record.clone();
        bad.hashes.pop();
        assert_eq!(
            Proof::try_from(&bad),
            Err(DecodeError::LengthMismatch { sides: 2, hashes: 1 })
        );
        let mut bad = record;
        bad.hashes[1] = "0xnothex".to_string();
        assert!(matches!(
            Proof::try_from(&bad),
            Err(DecodeError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_generate_and_verify() {
        let artifacts = generate();
        assert_eq!(artifacts.elements.len(), 5);
        assert_eq!(artifacts.modulus.len(), 2 + 2 * 256);
        assert_eq!(artifacts.elements[0].prime.len(), 2 + 2 * 16);
        assert_eq!(artifacts.elements[0].witness.len(), 2 + 2 * 256);

        let json = artifacts.to_json().unwrap();
        let decoded = Artifacts::from_json(&json).unwrap();
        assert_eq!(decoded, artifacts);

        let report = decoded.verify().unwrap();
        assert_eq!(report, Report { batch: Some(true), ..Report::default() });
        assert!(report.is_ok());
    }

    #[test]
    fn test_no_batch() {
        let artifacts = Artifacts::generate(RsaGroup::rsa2048(), BITS, &["only"], &[]).unwrap();
        assert!(artifacts.batch.is_none());
        assert!(!artifacts.to_json().unwrap().contains("batch"));
        // A lone leaf is its own root.
        assert!(artifacts.elements[0].merkle_proof.sides.is_empty());
        assert!(artifacts.verify().unwrap().is_ok());
    }

    #[test]
    fn test_swapped_witnesses_fail() {
        let mut artifacts = generate();
        let first = artifacts.elements[0].witness.clone();
        artifacts.elements[0].witness = artifacts.elements[1].witness.clone();
        artifacts.elements[1].witness = first;
        let report = artifacts.verify().unwrap();
        assert_eq!(report.rsa_failures, vec![0, 1]);
        assert!(report.merkle_failures.is_empty());
        assert!(!report.is_ok());
    }

    #[test]
    fn test_tampered_merkle_sibling_fails() {
        let mut artifacts = generate();
        artifacts.elements[2].merkle_proof.hashes[0] = encode_bytes(&[0u8; 32]);
        let report = artifacts.verify().unwrap();
        assert_eq!(report.merkle_failures, vec![2]);
        assert!(report.rsa_failures.is_empty());
    }

    #[test]
    fn test_tampered_batch() {
        let mut artifacts = generate();
        let batch = artifacts.batch.as_mut().unwrap();
        batch.witness = artifacts.elements[0].witness.clone();
        assert_eq!(artifacts.verify().unwrap().batch, Some(false));

        let mut artifacts = generate();
        artifacts.batch.as_mut().unwrap().primes.swap(0, 1);
        assert!(matches!(
            artifacts.verify(),
            Err(accumulator::Error::InvalidProofFormat(_))
        ));

        let mut artifacts = generate();
        artifacts.batch.as_mut().unwrap().product = "0x05".to_string();
        assert!(matches!(
            artifacts.verify(),
            Err(accumulator::Error::InvalidProofFormat(_))
        ));
    }

    #[test]
    fn test_malformed_values() {
        let mut artifacts = generate();
        artifacts.elements[1].prime = artifacts.elements[0].prime.clone();
        assert!(matches!(
            artifacts.verify(),
            Err(accumulator::Error::InvalidProofFormat(_))
        ));

        let mut artifacts = generate();
        artifacts.accumulator = "0xzz".to_string();
        assert!(matches!(
            artifacts.verify(),
            Err(accumulator::Error::InvalidProofFormat(_))
        ));

        let mut artifacts = generate();
        artifacts.merkle_root = "0x00".to_string();
        assert_eq!(
            artifacts.merkle_root(),
            Err(DecodeError::WrongLength {
                expected: 32,
                actual: 1
            })
        );
    }

    #[test]
    fn test_generate_errors() {
        assert!(matches!(
            Artifacts::generate::<&str>(RsaGroup::rsa2048(), BITS, &[], &[]),
            Err(GenerateError::Merkle(merkle::Error::NoLeaves))
        ));
        assert!(matches!(
            Artifacts::generate(RsaGroup::rsa2048(), BITS, &["a"], &[1]),
            Err(GenerateError::BatchIndex { index: 1, len: 1 })
        ));
        assert!(matches!(
            Artifacts::generate(RsaGroup::rsa2048(), BITS, &["a", "b"], &[0, 0]),
            Err(GenerateError::Accumulator(accumulator::Error::DuplicateElement(_)))
        ));
    }
}
