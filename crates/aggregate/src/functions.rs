use tally_core::ResultMap;

/// Folds one input record into a worker's private result map.
///
/// Must only touch the map it is given. Any closure
/// `Fn(&I, &mut ResultMap<O, H>) -> anyhow::Result<()>` is a reducer.
pub trait Reducer<I, O, H>: Send + Sync {
    fn reduce(&self, record: &I, local: &mut ResultMap<O, H>) -> anyhow::Result<()>;
}

impl<I, O, H, F> Reducer<I, O, H> for F
where
    F: Fn(&I, &mut ResultMap<O, H>) -> anyhow::Result<()> + Send + Sync,
{
    fn reduce(&self, record: &I, local: &mut ResultMap<O, H>) -> anyhow::Result<()> {
        self(record, local)
    }
}

/// Merges a finished partition's map into the shared map.
///
/// Must be associative and commutative over the order partitions finish in:
/// colliding keys merge their helpers and recompute the output from the merged
/// helper, new keys are inserted unchanged.
pub trait Combiner<O, H>: Send + Sync {
    fn combine(&self, global: &mut ResultMap<O, H>, local: ResultMap<O, H>) -> anyhow::Result<()>;
}

impl<O, H, F> Combiner<O, H> for F
where
    F: Fn(&mut ResultMap<O, H>, ResultMap<O, H>) -> anyhow::Result<()> + Send + Sync,
{
    fn combine(&self, global: &mut ResultMap<O, H>, local: ResultMap<O, H>) -> anyhow::Result<()> {
        self(global, local)
    }
}
