//! Live object-graph sweeping for heapscope.
//!
//! A [`Session`] owns a [`PathTable`] of nodes addressed by [`PathId`]. Roots
//! come from the probe's [`SeedProvider`]; nodes are expanded lazily by the
//! [`GraphSweeper`], which resolves field layouts through [`TypeResolver`] and
//! performs every heap access under the fault guard. [`RenderEngine`] turns
//! the results into [`Fragment`]s, serialized as HTML markup.

pub mod descriptor;
pub mod error;
pub mod exclusion;
pub mod fragment;
pub mod literal;
pub mod markup;
pub mod path_table;
pub mod render;
pub mod session;
pub mod snapshot;
pub mod strategy;
pub mod sweeper;
pub mod value;

pub use descriptor::{Dialect, FieldDescriptor, ResolveError, TypeDescriptor, TypeResolver};
pub use error::{Result, SweepError};
pub use exclusion::{ExclusionPattern, ExclusionSet, PatternError};
pub use fragment::{Cell, Fragment, Row};
pub use literal::LiteralError;
pub use path_table::{Node, NodeKind, NodeState, Ownership, PathId, PathTable, Target};
pub use render::RenderEngine;
pub use session::{OpenMode, Session};
pub use snapshot::snapshot;
pub use strategy::{StrategyRegistry, SweepStrategy};
pub use sweeper::{
    Entry, GraphSweeper, Probe, SeedFn, SeedProvider, StaticSeeds, SweepContext, SweepOptions,
};
