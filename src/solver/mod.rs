//! The constraint solver: the estimate lattice and the worklist engine that
//! drives estimates to a fixed point.

/// The lattice of set-valued type estimates and its run-scoped caches.
pub mod type_set;

/// The worklist fixed-point engine over the constraint graph.
pub mod constraint_solver;
