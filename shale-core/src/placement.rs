use crate::rpc::ShardApi;
use rand::Rng;
use std::sync::Arc;

/// The fixed, ordered set of storage shards established at startup.
///
/// Index stability is the whole contract: chunk placement records in the
/// catalog are only meaningful while index `i` keeps addressing the same
/// shard. Placement is uniform random over the set, not content- or
/// load-aware.
#[derive(Clone)]
pub struct ShardSet {
    shards: Vec<Arc<dyn ShardApi>>,
}

impl ShardSet {
    pub fn new(shards: Vec<Arc<dyn ShardApi>>) -> Self {
        Self { shards }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Pick a shard uniformly at random. Panics on an empty set; the gateway
    /// refuses to operate without shards.
    pub fn pick_random(&self) -> (usize, Arc<dyn ShardApi>) {
        let index = rand::thread_rng().gen_range(0..self.shards.len());
        (index, self.shards[index].clone())
    }

    pub fn get(&self, index: usize) -> Option<Arc<dyn ShardApi>> {
        self.shards.get(index).cloned()
    }
}
