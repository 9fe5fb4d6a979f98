//! An accumulator shared between one writer and many readers.
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Accumulator, Error};
use crate::hash_to_prime::HashedPrime;

/// Wraps an [`Accumulator`] so that additions and proofs can happen on
/// different threads.
///
/// Additions take the write lock; everything else takes the read lock, so a
/// witness and the digest it was issued against always come from the same
/// state. Verifiers should hold a [`SharedAccumulator::snapshot`], which is
/// an owned copy and never changes underneath them.
#[derive(Debug, Default)]
pub struct SharedAccumulator<A> {
    inner: RwLock<A>,
}

impl<A: Accumulator> SharedAccumulator<A>
where
    A::Digest: Clone,
{
    pub fn new(accumulator: A) -> Self {
        Self {
            inner: RwLock::new(accumulator),
        }
    }

    // A panic while holding the lock can't leave the accumulator half-updated:
    // every mutation happens after the last fallible step.
    pub fn read(&self) -> RwLockReadGuard<'_, A> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, A> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current digest, detached from the accumulator.
    pub fn snapshot(&self) -> A::Digest {
        self.read().digest().clone()
    }

    pub fn add(&self, element: &[u8]) -> Result<HashedPrime, Error> {
        self.write().add(element)
    }

    /// A witness together with the digest it verifies against.
    pub fn prove(&self, element: &[u8]) -> Result<(A::MembershipWitness, A::Digest), Error> {
        let accumulator = self.read();
        let witness = accumulator.prove(element)?;
        Ok((witness, accumulator.digest().clone()))
    }

    pub fn into_inner(self) -> A {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::RsaAccumulator;
    use crate::primitives::RsaGroup;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_snapshot_is_detached() {
        let shared = SharedAccumulator::new(RsaAccumulator::new(RsaGroup::rsa2048(), 128).unwrap());
        shared.add(b"a").unwrap();
        let before = shared.snapshot();
        shared.add(b"b").unwrap();
        assert_ne!(before, shared.snapshot());

        let (proof, digest) = shared.prove(b"a").unwrap();
        assert_eq!(digest.verify(&proof.witness, &proof.prime.prime), Ok(true));
        assert_eq!(before.verify(&proof.witness, &proof.prime.prime), Ok(false));
    }

    #[test]
    fn test_concurrent_add_and_prove() {
        let shared = Arc::new(SharedAccumulator::new(
            RsaAccumulator::new(RsaGroup::rsa2048(), 128).unwrap(),
        ));
        shared.add(b"seed").unwrap();

        let writer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for i in 0u32..16 {
                    shared.add(&i.to_be_bytes()).unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for _ in 0..8 {
                        let (proof, digest) = shared.prove(b"seed").unwrap();
                        assert_eq!(digest.verify(&proof.witness, &proof.prime.prime), Ok(true));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        let accumulator = Arc::try_unwrap(shared).unwrap().into_inner();
        assert_eq!(accumulator.len(), 17);
    }
}
