//! Generic binary merkle tree over hashable leaves.

use crate::hash::{hex_encode, sha256};
use crate::signature::ZERO_HASH;

/// Implemented by any type that can serve as a merkle leaf.
pub trait MerkleHash {
    fn merkle_hash(&self) -> [u8; 32];
}

/// A binary merkle tree. Leaves keep their insertion order; an odd level
/// duplicates its last node before pairing. The empty tree is legal and
/// reports [`ZERO_HASH`] as its root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree<T> {
    leaves: Vec<T>,
    root: [u8; 32],
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Tree {
            leaves: Vec::new(),
            root: [0u8; 32],
        }
    }
}

impl<T: MerkleHash + Clone> Tree<T> {
    pub fn new(leaves: Vec<T>) -> Self {
        let root = compute_root(&leaves);
        Tree { leaves, root }
    }

    pub fn root_hex(&self) -> String {
        if self.leaves.is_empty() {
            return ZERO_HASH.to_string();
        }
        format!("0x{}", hex_encode(&self.root))
    }

    /// The leaves in insertion order.
    pub fn values(&self) -> Vec<T> {
        self.leaves.clone()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

fn compute_root<T: MerkleHash>(leaves: &[T]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut level: Vec<[u8; 32]> = leaves.iter().map(MerkleHash::merkle_hash).collect();
    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut joined = [0u8; 64];
                joined[..32].copy_from_slice(&pair[0]);
                joined[32..].copy_from_slice(&pair[1]);
                sha256(&joined)
            })
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::{MerkleHash, Tree};
    use crate::hash::sha256;
    use crate::signature::ZERO_HASH;

    #[derive(Clone, Debug, PartialEq)]
    struct Leaf(u8);

    impl MerkleHash for Leaf {
        fn merkle_hash(&self) -> [u8; 32] {
            sha256(&[self.0])
        }
    }

    fn pair(left: [u8; 32], right: [u8; 32]) -> [u8; 32] {
        let mut joined = [0u8; 64];
        joined[..32].copy_from_slice(&left);
        joined[32..].copy_from_slice(&right);
        sha256(&joined)
    }

    #[test]
    fn empty_tree_reports_zero_hash() {
        let tree: Tree<Leaf> = Tree::new(Vec::new());
        assert_eq!(tree.root_hex(), ZERO_HASH);
        assert!(tree.is_empty());
    }

    #[test]
    fn single_leaf_root_is_the_leaf_hash() {
        let tree = Tree::new(vec![Leaf(1)]);
        let expected = Leaf(1).merkle_hash();
        assert!(tree.root_hex().ends_with(&crate::hash::hex_encode(&expected)));
    }

    #[test]
    fn two_leaves_pair_hash() {
        let tree = Tree::new(vec![Leaf(1), Leaf(2)]);
        let expected = pair(Leaf(1).merkle_hash(), Leaf(2).merkle_hash());
        assert_eq!(tree.root_hex(), format!("0x{}", crate::hash::hex_encode(&expected)));
    }

    #[test]
    fn odd_level_duplicates_last_leaf() {
        let tree = Tree::new(vec![Leaf(1), Leaf(2), Leaf(3)]);
        let left = pair(Leaf(1).merkle_hash(), Leaf(2).merkle_hash());
        let right = pair(Leaf(3).merkle_hash(), Leaf(3).merkle_hash());
        let expected = pair(left, right);
        assert_eq!(tree.root_hex(), format!("0x{}", crate::hash::hex_encode(&expected)));
    }

    #[test]
    fn values_keep_insertion_order() {
        let tree = Tree::new(vec![Leaf(3), Leaf(1), Leaf(2)]);
        assert_eq!(tree.values(), vec![Leaf(3), Leaf(1), Leaf(2)]);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn root_changes_with_leaf_order() {
        let forward = Tree::new(vec![Leaf(1), Leaf(2)]);
        let reversed = Tree::new(vec![Leaf(2), Leaf(1)]);
        assert_ne!(forward.root_hex(), reversed.root_hex());
    }
}
