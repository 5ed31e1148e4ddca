use crate::hashing::HashWriter;
use crate::Hash;

/// Merkle tree over transaction ids. Odd levels pair the last node with itself.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    /// Leaves at level 0, root alone at the last level
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn from_hashes(hashes: Vec<Hash>) -> Self {
        if hashes.is_empty() {
            return Self { levels: vec![] };
        }

        let mut levels = vec![hashes];
        loop {
            let current = &levels[levels.len() - 1];
            if current.len() <= 1 {
                break;
            }
            let next = current
                .chunks(2)
                .map(|pair| {
                    let left = pair[0];
                    let right = pair.get(1).copied().unwrap_or(left);
                    hash_pair(&left, &right)
                })
                .collect();
            levels.push(next);
        }

        Self { levels }
    }

    /// Root of the tree, the zero hash when empty
    pub fn root(&self) -> Hash {
        self.levels.last().and_then(|level| level.first().copied()).unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn generate_proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut elements = Vec::with_capacity(self.levels.len());
        let mut pos = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if pos % 2 == 0 { pos + 1 } else { pos - 1 };
            // Missing right sibling: the node was paired with itself
            let hash = level.get(sibling).copied().unwrap_or(level[pos]);
            elements.push(MerkleProofElement { hash, sibling_is_right: pos % 2 == 0 });
            pos /= 2;
        }

        Some(MerkleProof { elements, index })
    }
}

/// Merkle root of the given leaves
pub fn calc_merkle_root(hashes: impl IntoIterator<Item = Hash>) -> Hash {
    MerkleTree::from_hashes(hashes.into_iter().collect()).root()
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = HashWriter::new();
    hasher.update(left).update(right);
    hasher.finalize()
}

#[derive(Clone, Debug)]
pub struct MerkleProofElement {
    pub hash: Hash,
    pub sibling_is_right: bool,
}

#[derive(Clone, Debug)]
pub struct MerkleProof {
    pub elements: Vec<MerkleProofElement>,
    pub index: usize,
}

impl MerkleProof {
    pub fn verify(&self, leaf: Hash, root: Hash) -> bool {
        let computed = self.elements.iter().fold(leaf, |current, element| {
            if element.sibling_is_right {
                hash_pair(&current, &element.hash)
            } else {
                hash_pair(&element.hash, &current)
            }
        });
        computed == root
    }
}
