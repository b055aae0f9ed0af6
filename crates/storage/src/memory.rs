//! In-memory block log for nodes running without a data directory.

use std::sync::Mutex;

use ledgerd_primitives::block::BlockData;

use crate::{BlockStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    blocks: Mutex<Vec<BlockData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryStore {
    fn append(&self, block: &BlockData) -> Result<(), StoreError> {
        let mut blocks = self
            .blocks
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        blocks.push(block.clone());
        Ok(())
    }

    fn read_range(&self, from: u64, to: u64) -> Result<Vec<BlockData>, StoreError> {
        let blocks = self
            .blocks
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        Ok(blocks
            .iter()
            .filter(|block| block.header.number >= from && block.header.number <= to)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::BlockStore;
    use ledgerd_primitives::block::{BlockData, BlockHeader};

    fn block(number: u64) -> BlockData {
        BlockData {
            hash: format!("0x{number:064x}"),
            header: BlockHeader {
                number,
                ..BlockHeader::default()
            },
            trans: Vec::new(),
        }
    }

    #[test]
    fn reads_back_the_requested_range() {
        let store = MemoryStore::new();
        for number in 1..=5 {
            store.append(&block(number)).expect("append");
        }

        let middle = store.read_range(2, 4).expect("read");
        assert_eq!(
            middle.iter().map(|b| b.header.number).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );

        let all = store.read_range(1, u64::MAX).expect("read");
        assert_eq!(all.len(), 5);

        let none = store.read_range(6, u64::MAX).expect("read");
        assert!(none.is_empty());
    }
}
