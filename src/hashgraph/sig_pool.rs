use crate::hashgraph::block::BlockSignature;

/// Pending block signatures, deduplicated by (validator, block index).
/// The hashgraph keeps one for signatures lifted out of gossiped events;
/// the core keeps another for its own signatures awaiting broadcast.
#[derive(Debug, Default)]
pub(crate) struct SigPool {
    signatures: Vec<BlockSignature>,
}

impl SigPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, signature: BlockSignature) {
        let exists = self
            .signatures
            .iter()
            .any(|s| s.validator == signature.validator && s.index == signature.index);
        if !exists {
            self.signatures.push(signature);
        }
    }

    pub(crate) fn slice(&self) -> Vec<BlockSignature> {
        self.signatures.clone()
    }

    pub(crate) fn drain(&mut self) -> Vec<BlockSignature> {
        std::mem::take(&mut self.signatures)
    }

    pub(crate) fn remove_slice(&mut self, removed: &[BlockSignature]) {
        self.signatures.retain(|s| {
            !removed
                .iter()
                .any(|r| r.validator == s.validator && r.index == s.index)
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.signatures.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn signature(validator: &str, index: i64) -> BlockSignature {
        BlockSignature {
            validator: validator.to_string(),
            index,
            signature: "00".to_string(),
        }
    }

    #[test]
    fn test_add_deduplicates() {
        let mut pool = SigPool::new();
        pool.add(signature("a", 0));
        pool.add(signature("a", 0));
        pool.add(signature("a", 1));
        pool.add(signature("b", 0));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_remove_slice() {
        let mut pool = SigPool::new();
        pool.add(signature("a", 0));
        pool.add(signature("b", 0));
        let taken = pool.slice();
        pool.remove_slice(&taken[..1]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.slice()[0].validator, "b");
    }

    #[test]
    fn test_drain_empties_pool() {
        let mut pool = SigPool::new();
        pool.add(signature("a", 0));
        assert_eq!(pool.drain().len(), 1);
        assert!(pool.is_empty());
    }
}
