//! Binary Merkle hash tree over an ordered list of leaves.
//!
//! Leaves are `H(element)` and interior nodes are `H(left || right)`, with no
//! domain separation, so roots match those of the usual SHA-256 Merkle tools.
//!
//! When a level has an odd number of nodes, its last node is promoted to the
//! next level unchanged. A promoted node gets no proof step for that level,
//! so proofs for different leaves of the same tree can differ in length.
use derivative::Derivative;
use digest::{Digest, Output};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use thiserror::Error;

use crate::encoding;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("cannot build a Merkle tree with no leaves")]
    NoLeaves,
}

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Hash `sibling || current`.
    Left,
    /// Hash `current || sibling`.
    Right,
}

use Side::*;

impl From<Side> for u8 {
    fn from(side: Side) -> Self {
        match side {
            Left => 0,
            Right => 1,
        }
    }
}

impl TryFrom<u8> for Side {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Left),
            1 => Ok(Right),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProofStep {
    pub side: Side,
    #[serde(with = "encoding::hex_bytes")]
    pub sibling: Vec<u8>,
}

/// Sibling hashes from a leaf up to the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proof {
    steps: Vec<ProofStep>,
}

impl Proof {
    pub fn new(steps: Vec<ProofStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[ProofStep] {
        &self.steps
    }

    pub fn steps_mut(&mut self) -> &mut [ProofStep] {
        &mut self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn hash_interior<H: Digest>(left: &[u8], right: &[u8]) -> Output<H> {
    H::new().chain_update(left).chain_update(right).finalize()
}

/// Fold `proof` onto `leaf`. `None` if a sibling has the wrong length.
fn fold<H: Digest>(leaf: Output<H>, proof: &Proof) -> Option<Output<H>> {
    let mut current = leaf;
    for step in proof.steps() {
        if step.sibling.len() != <H as Digest>::output_size() {
            return None;
        }
        current = match step.side {
            Left => hash_interior::<H>(&step.sibling, &current),
            Right => hash_interior::<H>(&current, &step.sibling),
        };
    }
    Some(current)
}

/// The published root of a tree.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), PartialEq(bound = ""), Eq(bound = ""), Debug(bound = ""))]
pub struct Root<H: Digest = Sha256> {
    value: Output<H>,
}

impl<H: Digest> Root<H> {
    /// `None` unless `bytes` is exactly one digest long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != <H as Digest>::output_size() {
            return None;
        }
        Some(Self {
            value: Output::<H>::clone_from_slice(bytes),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.value.as_slice()
    }

    /// Check that `element` is included under this root.
    #[must_use]
    pub fn verify(&self, element: &[u8], proof: &Proof) -> bool {
        self.verify_leaf_hash_inner(H::digest(element), proof)
    }

    /// Like [`Root::verify`], for a caller that only has `H(element)`.
    #[must_use]
    pub fn verify_leaf_hash(&self, leaf_hash: &[u8], proof: &Proof) -> bool {
        match Self::from_bytes(leaf_hash) {
            Some(leaf) => self.verify_leaf_hash_inner(leaf.value, proof),
            None => false,
        }
    }

    fn verify_leaf_hash_inner(&self, leaf: Output<H>, proof: &Proof) -> bool {
        match fold::<H>(leaf, proof) {
            Some(computed) => computed == self.value,
            None => false,
        }
    }
}

impl<H: Digest> Serialize for Root<H> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        encoding::hex_bytes::serialize(self.as_bytes(), s)
    }
}

impl<'de, H: Digest> Deserialize<'de> for Root<H> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes = encoding::hex_bytes::deserialize(d)?;
        Self::from_bytes(&bytes).ok_or_else(|| {
            serde::de::Error::invalid_length(bytes.len(), &"a digest-sized root")
        })
    }
}

/// A fully materialized tree; `levels[0]` holds the leaf hashes and the last
/// level holds only the root.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Tree<H: Digest = Sha256> {
    levels: Vec<Vec<Output<H>>>,
}

impl<H: Digest> Tree<H> {
    pub fn build<I>(leaves: I) -> Result<Self, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let hashes = leaves
            .into_iter()
            .map(|leaf| H::digest(leaf.as_ref()))
            .collect();
        Self::from_leaf_hashes(hashes)
    }

    pub fn from_leaf_hashes(leaves: Vec<Output<H>>) -> Result<Self, Error> {
        if leaves.is_empty() {
            return Err(Error::NoLeaves);
        }
        let mut levels = vec![leaves];
        loop {
            let level = levels.last().expect("at least one level");
            if level.len() == 1 {
                break;
            }
            let next = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_interior::<H>(left, right),
                    [single] => single.clone(),
                    _ => unreachable!("chunks(2)"),
                })
                .collect();
            levels.push(next);
        }
        Ok(Self { levels })
    }

    pub fn root(&self) -> Root<H> {
        let top = self.levels.last().expect("at least one level");
        Root {
            value: top[0].clone(),
        }
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of hashing levels above the leaves; the longest possible proof.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn leaf(&self, index: usize) -> Option<&[u8]> {
        self.levels[0].get(index).map(|h| h.as_slice())
    }

    pub fn prove(&self, index: usize) -> Option<Proof> {
        if index >= self.len() {
            return None;
        }
        Some(self.path(index))
    }

    /// Proofs for every leaf, in leaf order.
    pub fn proofs(&self) -> Vec<Proof> {
        (0..self.len()).map(|i| self.path(i)).collect()
    }

    fn path(&self, mut index: usize) -> Proof {
        let mut steps = Vec::with_capacity(self.depth());
        for level in &self.levels[..self.depth()] {
            let sibling = index ^ 1;
            // No sibling: this node was promoted.
            if let Some(hash) = level.get(sibling) {
                let side = if index % 2 == 0 { Right } else { Left };
                steps.push(ProofStep {
                    side,
                    sibling: hash.to_vec(),
                });
            }
            index /= 2;
        }
        Proof::new(steps)
    }
}

/// Build a SHA-256 tree, returning its root and a proof for every leaf.
pub fn build<I>(leaves: I) -> Result<(Root, Vec<Proof>), Error>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let tree = Tree::<Sha256>::build(leaves)?;
    Ok((tree.root(), tree.proofs()))
}

/// Check a SHA-256 tree proof.
#[must_use]
pub fn verify(proof: &Proof, root: &Root, element: &[u8]) -> bool {
    root.verify(element, proof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use proptest::sample::Index;

    type Element = Vec<u8>;

    fn leaf_sets() -> impl Strategy<Value = Vec<Element>> {
        prop::collection::vec(prop::collection::vec(any::<u8>(), 0..8), 1..40)
    }

    proptest! {
        /// Every proof produced by the tree verifies against its root.
        #[test]
        fn test_tree(leaves in leaf_sets()) {
            let (root, proofs) = build(&leaves)?;
            prop_assert_eq!(proofs.len(), leaves.len());
            for (leaf, proof) in leaves.iter().zip(proofs.iter()) {
                prop_assert!(verify(proof, &root, leaf));
            }
        }

        /// A proof for one element doesn't verify a different element.
        #[test]
        fn test_tree_wrong_element(leaves in leaf_sets(), index: Index, other: Element) {
            prop_assume!(!leaves.contains(&other));
            let tree = Tree::<Sha256>::build(&leaves)?;
            let proof = tree.prove(index.index(leaves.len())).unwrap();
            prop_assert!(!tree.root().verify(&other, &proof));
        }

        /// Verification fails if any bit of any sibling hash is flipped.
        #[test]
        fn test_tree_bad_sibling(leaves in leaf_sets(), index: Index, step: Index, bit: Index) {
            prop_assume!(leaves.len() > 1);
            let i = index.index(leaves.len());
            let tree = Tree::<Sha256>::build(&leaves)?;
            let mut proof = tree.prove(i).unwrap();
            prop_assume!(!proof.is_empty());
            let step = step.index(proof.len());
            let bit = bit.index(Sha256::output_size() * 8);
            proof.steps_mut()[step].sibling[bit / 8] ^= 1 << (bit % 8);
            prop_assert!(!tree.root().verify(&leaves[i], &proof));
        }

        /// Verification fails if any bit of the root is flipped.
        #[test]
        fn test_tree_bad_root(leaves in leaf_sets(), index: Index, bit: Index) {
            let i = index.index(leaves.len());
            let tree = Tree::<Sha256>::build(&leaves)?;
            let proof = tree.prove(i).unwrap();
            let mut root = tree.root().as_bytes().to_vec();
            let bit = bit.index(root.len() * 8);
            root[bit / 8] ^= 1 << (bit % 8);
            let root = Root::<Sha256>::from_bytes(&root).unwrap();
            prop_assert!(!root.verify(&leaves[i], &proof));
        }

        #[test]
        fn test_proof_length(leaves in leaf_sets()) {
            let tree = Tree::<Sha256>::build(&leaves)?;
            let depth = tree.depth();
            prop_assert!(1usize << depth >= leaves.len());
            for proof in tree.proofs() {
                prop_assert!(proof.len() <= depth);
            }
            if leaves.len().is_power_of_two() {
                for proof in tree.proofs() {
                    prop_assert_eq!(proof.len(), depth);
                }
            }
        }
    }

    #[test]
    fn test_four_leaves() {
        let leaves = ["a", "b", "c", "d"];
        let tree = Tree::<Sha256>::build(leaves).unwrap();
        assert_eq!(tree.depth(), 2);

        let proof = tree.prove(2).unwrap();
        assert_eq!(proof.len(), 2);
        assert_eq!(proof.steps()[0].side, Right);
        assert_eq!(proof.steps()[0].sibling, Sha256::digest(b"d").to_vec());
        assert_eq!(proof.steps()[1].side, Left);

        let root = tree.root();
        let ab = hash_interior::<Sha256>(&Sha256::digest(b"a"), &Sha256::digest(b"b"));
        let cd = hash_interior::<Sha256>(&Sha256::digest(b"c"), &Sha256::digest(b"d"));
        assert_eq!(root.as_bytes(), hash_interior::<Sha256>(&ab, &cd).as_slice());
        assert_eq!(proof.steps()[1].sibling, ab.to_vec());

        assert!(verify(&proof, &root, b"c"));
        assert!(!verify(&proof, &root, b"e"));
        assert!(root.verify_leaf_hash(&Sha256::digest(b"c"), &proof));
    }

    #[test]
    fn test_side_order_matters() {
        let tree = Tree::<Sha256>::build(["a", "b"]).unwrap();
        let mut proof = tree.prove(0).unwrap();
        assert!(tree.root().verify(b"a", &proof));
        proof.steps_mut()[0].side = Left;
        assert!(!tree.root().verify(b"a", &proof));
    }

    #[test]
    fn test_single_leaf() {
        let tree = Tree::<Sha256>::build(["only"]).unwrap();
        assert_eq!(tree.depth(), 0);
        let proof = tree.prove(0).unwrap();
        assert!(proof.is_empty());
        assert_eq!(tree.root().as_bytes(), Sha256::digest(b"only").as_slice());
        assert!(tree.root().verify(b"only", &proof));
        assert!(!tree.root().verify(b"other", &proof));
    }

    #[test]
    fn test_odd_leaf_promoted() {
        let tree = Tree::<Sha256>::build(["a", "b", "c"]).unwrap();
        assert_eq!(tree.depth(), 2);
        // "c" has no sibling on the bottom level.
        let proof = tree.prove(2).unwrap();
        assert_eq!(proof.len(), 1);
        assert_eq!(proof.steps()[0].side, Left);
        let ab = hash_interior::<Sha256>(&Sha256::digest(b"a"), &Sha256::digest(b"b"));
        let expected = hash_interior::<Sha256>(&ab, &Sha256::digest(b"c"));
        assert_eq!(tree.root().as_bytes(), expected.as_slice());
        assert!(tree.root().verify(b"c", &proof));
    }

    #[test]
    fn test_malformed_proof_is_false() {
        let tree = Tree::<Sha256>::build(["a", "b", "c", "d"]).unwrap();
        let mut proof = tree.prove(1).unwrap();
        proof.steps_mut()[0].sibling.pop();
        assert!(!tree.root().verify(b"b", &proof));
        assert!(!tree.root().verify_leaf_hash(b"short", &tree.prove(1).unwrap()));
    }

    #[test]
    fn test_empty() {
        assert_eq!(
            Tree::<Sha256>::build(Vec::<Vec<u8>>::new()).unwrap_err(),
            Error::NoLeaves
        );
        assert!(Tree::<Sha256>::build(["a"]).unwrap().prove(1).is_none());
    }

    #[test]
    fn test_other_hasher() {
        let leaves = ["x", "y", "z"];
        let tree = Tree::<sha3::Sha3_256>::build(leaves).unwrap();
        for (i, leaf) in leaves.iter().enumerate() {
            assert!(tree.root().verify(leaf.as_bytes(), &tree.prove(i).unwrap()));
        }
        assert_ne!(
            tree.root().as_bytes(),
            Tree::<Sha256>::build(leaves).unwrap().root().as_bytes()
        );
    }

    #[test]
    fn test_root_serde() {
        let root = Tree::<Sha256>::build(["a"]).unwrap().root();
        let json = serde_json::to_string(&root).unwrap();
        assert_eq!(json, format!("\"{}\"", encoding::encode_bytes(root.as_bytes())));
        assert_eq!(serde_json::from_str::<Root>(&json).unwrap(), root);
        assert!(serde_json::from_str::<Root>("\"0x0011\"").is_err());
    }
}
