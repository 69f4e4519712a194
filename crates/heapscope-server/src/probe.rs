//! Building a [`Probe`] from configuration.

use std::sync::Arc;

use heapscope_config::{SnapshotConfig, SweepConfig};
use heapscope_runtime::Heap;
use heapscope_sweep::{ExclusionSet, PatternError, Probe, SeedProvider, StrategyRegistry, SweepOptions};

fn sweep_options(config: &SweepConfig) -> SweepOptions {
    SweepOptions {
        retain_objects: config.retain_objects,
        root_base_type: config.root_base_type.clone(),
    }
}

/// Probe for interactive sessions.
pub fn probe_from_config(
    heap: Arc<Heap>,
    seeds: impl SeedProvider + 'static,
    config: &SweepConfig,
) -> Result<Probe, PatternError> {
    let exclusions = ExclusionSet::parse(&config.exclusions)?;
    Ok(Probe::new(heap, seeds)
        .with_exclusions(exclusions)
        .with_strategies(StrategyRegistry::default().with_leaf_types(&config.leaf_types))
        .with_options(sweep_options(config)))
}

/// Probe for offline snapshots: same sweep options, snapshot exclusions.
pub fn snapshot_probe(
    heap: Arc<Heap>,
    seeds: impl SeedProvider + 'static,
    sweep: &SweepConfig,
    snapshot: &SnapshotConfig,
) -> Result<Probe, PatternError> {
    let exclusions = ExclusionSet::parse(&snapshot.exclusions)?;
    Ok(probe_from_config(heap, seeds, sweep)?.with_exclusions(exclusions))
}
