use std::collections::HashMap;

use heapscope_runtime::{ClassId, Heap, ARRAY_CLASS, DICTIONARY_CLASS, SET_CLASS, STRING_CLASS};

/// How the sweep treats instances of a type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepStrategy {
    /// Expand declared fields, related views and the superclass chain.
    Fields,
    /// Expand collection members.
    Elements,
    /// Render the value inline; never expand.
    Leaf,
}

/// Capability lookup keyed by type name. Subclasses inherit the strategy of
/// the nearest registered ancestor; unregistered chains fall back to
/// [`SweepStrategy::Fields`].
#[derive(Clone, Debug)]
pub struct StrategyRegistry {
    by_type: HashMap<String, SweepStrategy>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
        }
    }

    pub fn register(&mut self, type_name: impl Into<String>, strategy: SweepStrategy) {
        self.by_type.insert(type_name.into(), strategy);
    }

    pub fn with_leaf_types<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.register(name, SweepStrategy::Leaf);
        }
        self
    }

    pub fn strategy_for(&self, heap: &Heap, class: ClassId) -> SweepStrategy {
        let mut current = heap.class(class);
        while let Some(meta) = current {
            if let Some(strategy) = self.by_type.get(&meta.name) {
                return *strategy;
            }
            current = meta.superclass.and_then(|id| heap.class(id));
        }
        SweepStrategy::Fields
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(STRING_CLASS, SweepStrategy::Leaf);
        registry.register(ARRAY_CLASS, SweepStrategy::Elements);
        registry.register(SET_CLASS, SweepStrategy::Elements);
        registry.register(DICTIONARY_CLASS, SweepStrategy::Elements);
        registry
    }
}
