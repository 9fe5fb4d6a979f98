use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use itertools::Itertools;
use log::debug;
use rayon::prelude::*;
use rug::Integer;
use serde::Serialize;

use super::{Accumulator, Digest, Error};
use crate::encoding;
use crate::hash_to_prime::{self, hash_to_prime, prime_from_nonce, HashedPrime};
use crate::primitives::{Prime, RsaGroup};

/// Complement primes folded into the batch witness between cancellation checks.
const AGGREGATE_CHUNK_SIZE: usize = 64;
/// Below this many primes, `prove_all` stops forking.
const PRECOMPUTE_CHUNK_SIZE: usize = 4;

/// The verifier's view of an RSA accumulator: `(n, g)` and `A`.
///
/// Cheap to clone; the group parameters are shared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RsaAccumulatorDigest {
    group: Arc<RsaGroup>,
    #[serde(with = "encoding::hex_integer")]
    value: Integer,
}

impl RsaAccumulatorDigest {
    /// The digest of the empty set, which is just `g`.
    pub fn empty(group: Arc<RsaGroup>) -> Self {
        let value = group.generator().clone();
        Self { group, value }
    }

    /// Wrap a published accumulator value.
    pub fn new(group: Arc<RsaGroup>, value: Integer) -> Result<Self, Error> {
        if !group.contains(&value) {
            return Err(Error::InvalidProofFormat(
                "accumulator value is not in [0, n)".to_string(),
            ));
        }
        Ok(Self { group, value })
    }

    pub fn group(&self) -> &RsaGroup {
        &self.group
    }

    pub fn value(&self) -> &Integer {
        &self.value
    }

    fn check_witness(&self, witness: &Integer) -> Result<(), Error> {
        if !self.group.contains(witness) {
            return Err(Error::InvalidProofFormat(
                "witness is not in [0, n)".to_string(),
            ));
        }
        Ok(())
    }

    fn check_prime(&self, prime: &Prime) -> Result<(), Error> {
        if *prime.inner() < 2u8 || !self.group.contains(prime.inner()) {
            return Err(Error::InvalidProofFormat(format!(
                "prime representative {prime} is not in [2, n)"
            )));
        }
        Ok(())
    }

    /// Check `witness^prime == A (mod n)`.
    pub fn verify(&self, witness: &Integer, prime: &Prime) -> Result<bool, Error> {
        self.check_witness(witness)?;
        self.check_prime(prime)?;
        Ok(self.group.pow(witness, prime.inner()) == self.value)
    }

    /// Check `witness^(p_1 * ... * p_k) == A (mod n)`.
    ///
    /// This attests that every `p_i` was accumulated. It says nothing about
    /// whether the primes are distinct or whether other primes were
    /// accumulated too.
    pub fn verify_batch(&self, witness: &Integer, primes: &[Prime]) -> Result<bool, Error> {
        if primes.is_empty() {
            return Err(Error::EmptyBatch);
        }
        for prime in primes {
            self.check_prime(prime)?;
        }
        // The product is not reduced: it is an exponent, not a residue.
        let product = Integer::from(Integer::product(primes.iter().map(Prime::inner)));
        self.verify_product(witness, &product)
    }

    /// Like [`Self::verify_batch`], with the product of the primes already
    /// computed by the caller.
    pub fn verify_product(&self, witness: &Integer, product: &Integer) -> Result<bool, Error> {
        self.check_witness(witness)?;
        if *product < 2u8 {
            return Err(Error::InvalidProofFormat(
                "exponent product must be at least 2".to_string(),
            ));
        }
        Ok(self.group.pow(witness, product) == self.value)
    }

    /// Merge witnesses for two coprime exponents into one witness for their
    /// product, without knowing any other accumulated prime.
    ///
    /// With `a * p1 + b * p2 = 1`, the result is `w1^b * w2^a`.
    pub fn aggregate_witnesses(
        &self,
        w1: &Integer,
        p1: &Prime,
        w2: &Integer,
        p2: &Prime,
    ) -> Result<Integer, Error> {
        if !self.verify(w1, p1)? || !self.verify(w2, p2)? {
            return Err(Error::InvalidProofFormat(
                "witnesses to merge must both verify".to_string(),
            ));
        }
        let (gcd, a, b) =
            <(Integer, Integer, Integer)>::from(p1.inner().gcd_cofactors_ref(p2.inner()));
        if gcd != 1u8 {
            return Err(Error::InvalidProofFormat(format!(
                "exponents {p1} and {p2} are not coprime"
            )));
        }
        let not_invertible =
            || Error::InvalidProofFormat("witness is not invertible mod n".to_string());
        let left = self.group.pow_signed(w1, &b).ok_or_else(not_invertible)?;
        let right = self.group.pow_signed(w2, &a).ok_or_else(not_invertible)?;
        Ok(left * right % self.group.modulus())
    }

    /// Recompute the representative of `element` from its nonce, then verify.
    pub fn verify_element(
        &self,
        element: &[u8],
        bits: u32,
        nonce: u64,
        witness: &Integer,
    ) -> Result<bool, Error> {
        let prime = prime_from_nonce(element, bits, nonce).map_err(|err| match err {
            hash_to_prime::Error::NotPrime { .. } => Error::InvalidProofFormat(err.to_string()),
            other => other.into(),
        })?;
        self.verify(witness, &prime)
    }
}

impl Digest for RsaAccumulatorDigest {
    type Witness = Integer;
    type Member = Prime;

    fn verify(&self, witness: &Integer, member: &Prime) -> Result<bool, Error> {
        RsaAccumulatorDigest::verify(self, witness, member)
    }

    fn verify_batch(&self, witness: &Integer, members: &[Prime]) -> Result<bool, Error> {
        RsaAccumulatorDigest::verify_batch(self, witness, members)
    }
}

/// A single element's witness together with its representative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MembershipWitness {
    pub prime: HashedPrime,
    #[serde(with = "encoding::hex_integer")]
    pub witness: Integer,
}

/// One witness for a whole batch of elements.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchWitness {
    #[serde(with = "encoding::hex_integer")]
    pub witness: Integer,
    /// In the order the elements were requested.
    pub primes: Vec<Prime>,
    /// `primes` multiplied together, unreduced.
    #[serde(with = "encoding::hex_integer")]
    pub product: Integer,
}

/// The maintainer's side of an RSA accumulator.
///
/// Holds every accumulated element, so it can issue witnesses. Hand
/// [`RsaAccumulator::digest`] snapshots to verifiers instead of sharing this.
#[derive(Clone, Debug)]
pub struct RsaAccumulator {
    digest: RsaAccumulatorDigest,
    prime_bits: u32,
    members: Vec<(Vec<u8>, HashedPrime)>,
    indexes: HashMap<Vec<u8>, usize>,
    /// Product of every member's prime: `A == g^exponent`.
    exponent: Integer,
}

fn product(values: &[&Integer]) -> Integer {
    Integer::from(Integer::product(values.iter().copied()))
}

/// Witnesses for every prime in `primes`, given `base` such that the
/// accumulator value is `base^(product of primes)`.
///
/// Splits the set in half: every prime on the left shares the partial witness
/// `base^(product of right)`, and vice versa.
fn root_factor(group: &RsaGroup, base: Integer, primes: &[&Integer]) -> Vec<Integer> {
    if primes.len() == 1 {
        return vec![base];
    }
    let (left, right) = primes.split_at(primes.len() / 2);
    let left_base = group.pow(&base, &product(right));
    let right_base = group.pow(&base, &product(left));
    let (mut witnesses, right_witnesses) = if primes.len() >= PRECOMPUTE_CHUNK_SIZE {
        rayon::join(
            || root_factor(group, left_base, left),
            || root_factor(group, right_base, right),
        )
    } else {
        (
            root_factor(group, left_base, left),
            root_factor(group, right_base, right),
        )
    };
    witnesses.extend(right_witnesses);
    witnesses
}

impl RsaAccumulator {
    /// Representatives must stay below `n`, so `prime_bits` has to be smaller
    /// than the bit length of the modulus.
    pub fn new(group: Arc<RsaGroup>, prime_bits: u32) -> Result<Self, Error> {
        hash_to_prime::check_bits(prime_bits)?;
        let modulus_bits = group.modulus().significant_bits();
        if prime_bits >= modulus_bits {
            return Err(Error::PrimeTooLarge {
                bits: prime_bits,
                modulus_bits,
            });
        }
        Ok(Self {
            digest: RsaAccumulatorDigest::empty(group),
            prime_bits,
            members: Vec::new(),
            indexes: HashMap::new(),
            exponent: Integer::from(1u8),
        })
    }

    /// A new accumulator over `elements`.
    pub fn import<I>(group: Arc<RsaGroup>, prime_bits: u32, elements: I) -> Result<Self, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut acc = Self::new(group, prime_bits)?;
        acc.add_batch(elements)?;
        Ok(acc)
    }

    pub fn digest(&self) -> &RsaAccumulatorDigest {
        &self.digest
    }

    pub fn group(&self) -> &RsaGroup {
        &self.digest.group
    }

    pub fn prime_bits(&self) -> u32 {
        self.prime_bits
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, element: &[u8]) -> Option<&HashedPrime> {
        self.indexes.get(element).map(|&i| &self.members[i].1)
    }

    pub fn contains(&self, element: &[u8]) -> bool {
        self.indexes.contains_key(element)
    }

    /// Members in insertion order.
    pub fn elements(&self) -> impl Iterator<Item = (&[u8], &HashedPrime)> {
        self.members.iter().map(|(e, h)| (e.as_slice(), h))
    }

    fn insert(&mut self, element: Vec<u8>, hashed: HashedPrime) {
        self.indexes.insert(element.clone(), self.members.len());
        self.members.push((element, hashed));
    }

    /// Accumulate one element. Re-adding a member changes nothing.
    ///
    /// Every witness issued before this call goes stale.
    pub fn add(&mut self, element: &[u8]) -> Result<HashedPrime, Error> {
        if let Some(existing) = self.get(element) {
            return Ok(existing.clone());
        }
        let hashed = hash_to_prime(element, self.prime_bits)?;
        self.digest.value = self.digest.group.pow(&self.digest.value, hashed.prime.inner());
        self.exponent *= hashed.prime.inner();
        self.insert(element.to_vec(), hashed.clone());
        Ok(hashed)
    }

    /// Accumulate many elements with a single exponentiation.
    ///
    /// Returns each input's representative, in input order. If any element
    /// fails to hash, nothing is added.
    pub fn add_batch<I>(&mut self, elements: I) -> Result<Vec<HashedPrime>, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let elements: Vec<Vec<u8>> = elements
            .into_iter()
            .map(|e| e.as_ref().to_vec())
            .collect();
        let bits = self.prime_bits;
        let hashed = elements
            .par_iter()
            .map(|element| match self.get(element) {
                Some(existing) => Ok(existing.clone()),
                None => hash_to_prime(element, bits),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut exponent = Integer::from(1u8);
        let before = self.len();
        for (element, hashed) in elements.into_iter().zip(hashed.iter()) {
            // Already a member, or repeated earlier in this batch.
            if self.contains(&element) {
                continue;
            }
            exponent *= hashed.prime.inner();
            self.insert(element, hashed.clone());
        }
        if exponent > 1u8 {
            self.digest.value = self.digest.group.pow(&self.digest.value, &exponent);
            self.exponent *= &exponent;
        }
        debug!(
            "accumulated {} new elements ({} total)",
            self.len() - before,
            self.len()
        );
        Ok(hashed)
    }

    /// Witness for one member: `g` raised to every other member's prime.
    pub fn prove(&self, element: &[u8]) -> Result<MembershipWitness, Error> {
        let hashed = self
            .get(element)
            .ok_or_else(|| Error::NotAMember(element.to_vec()))?;
        let cofactor = Integer::from(self.exponent.div_exact_ref(hashed.prime.inner()));
        Ok(MembershipWitness {
            prime: hashed.clone(),
            witness: self.group().generate(&cofactor),
        })
    }

    /// Witnesses for every member, in insertion order.
    pub fn prove_all(&self) -> Vec<MembershipWitness> {
        if self.members.is_empty() {
            return Vec::new();
        }
        let primes: Vec<&Integer> = self.members.iter().map(|(_, h)| h.prime.inner()).collect();
        let witnesses = root_factor(self.group(), self.group().generator().clone(), &primes);
        debug!("precomputed {} membership witnesses", witnesses.len());
        self.members
            .iter()
            .zip(witnesses)
            .map(|((_, hashed), witness)| MembershipWitness {
                prime: hashed.clone(),
                witness,
            })
            .collect()
    }

    /// One witness for all of `elements`, which must be distinct members.
    pub fn aggregate<E: AsRef<[u8]>>(&self, elements: &[E]) -> Result<BatchWitness, Error> {
        self.aggregate_cancellable(elements, &AtomicBool::new(false))
    }

    /// Like [`Self::aggregate`], but gives up with [`Error::Cancelled`] as
    /// soon as it notices `cancel` is set. Nothing is kept from a cancelled
    /// run.
    pub fn aggregate_cancellable<E: AsRef<[u8]>>(
        &self,
        elements: &[E],
        cancel: &AtomicBool,
    ) -> Result<BatchWitness, Error> {
        if elements.is_empty() {
            return Err(Error::EmptyBatch);
        }
        if let Some(duplicate) = elements.iter().map(AsRef::<[u8]>::as_ref).duplicates().next() {
            return Err(Error::DuplicateElement(duplicate.to_vec()));
        }

        let mut selected = vec![false; self.members.len()];
        let mut primes = Vec::with_capacity(elements.len());
        for element in elements {
            let element = element.as_ref();
            let index = *self
                .indexes
                .get(element)
                .ok_or_else(|| Error::NotAMember(element.to_vec()))?;
            selected[index] = true;
            primes.push(self.members[index].1.prime.clone());
        }

        let complement: Vec<&Integer> = self
            .members
            .iter()
            .zip(&selected)
            .filter(|(_, &chosen)| !chosen)
            .map(|((_, hashed), _)| hashed.prime.inner())
            .collect();
        let mut witness = self.group().generator().clone();
        for chunk in complement.chunks(AGGREGATE_CHUNK_SIZE) {
            if cancel.load(Ordering::Relaxed) {
                debug!("batch witness for {} elements cancelled", elements.len());
                return Err(Error::Cancelled);
            }
            witness = self.group().pow(&witness, &product(chunk));
        }

        let product = Integer::from(Integer::product(primes.iter().map(Prime::inner)));
        debug!(
            "aggregated {} of {} members into one witness",
            primes.len(),
            self.len()
        );
        Ok(BatchWitness {
            witness,
            primes,
            product,
        })
    }
}

impl Accumulator for RsaAccumulator {
    type Digest = RsaAccumulatorDigest;
    type MembershipWitness = MembershipWitness;
    type BatchWitness = BatchWitness;

    fn digest(&self) -> &RsaAccumulatorDigest {
        &self.digest
    }

    fn add(&mut self, element: &[u8]) -> Result<HashedPrime, Error> {
        RsaAccumulator::add(self, element)
    }

    fn prove(&self, element: &[u8]) -> Result<MembershipWitness, Error> {
        RsaAccumulator::prove(self, element)
    }

    fn aggregate(&self, elements: &[&[u8]]) -> Result<BatchWitness, Error> {
        RsaAccumulator::aggregate(self, elements)
    }
}
