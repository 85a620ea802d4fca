//! A distributed-memory geometric multigrid solver for elliptic equations on
//! block-structured, octree/quadtree-refined meshes in two or three dimensions.
//!
//! The solver operates on a [`forest::Forest`] of fixed-size cell-centered
//! blocks spread across ranks, keeps block halos consistent through a
//! deterministic key-sorted ghost-cell exchange, and solves `L φ = ρ` with a
//! Full Approximation Scheme multigrid driver (V-cycles and FMG).

pub mod array;
pub mod comm;
pub mod field;
pub mod forest;
pub mod geometry;
pub mod solver;

/// Provides the types most programs built on `strata` need.
pub mod prelude {
    pub use crate::comm::{CommError, LocalCluster, RankBuffers, Transport};
    pub use crate::field::Field;
    pub use crate::forest::{Forest, ForestBuilder, Level, Neighbor};
    pub use crate::geometry::{faces, ChildIndex, Face, IndexSpace, Rectangle};
    pub use crate::solver::{
        BcKind, BcValue, BoundarySet, CycleConfig, FaceCondition, Multigrid, SmootherKind,
    };
}
