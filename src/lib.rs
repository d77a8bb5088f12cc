//! # Generic Type Argument Inference by Constraint Propagation
//!
//! Given a constraint model built by upstream program analysis over source
//! that still uses raw parametric types, this crate infers concrete generic
//! type arguments: assignability relationships become a constraint graph
//! over symbolic variables, set-valued type estimates are propagated to a
//! fixed point, and one concrete type is chosen per equivalence class. The
//! outputs are two per-compilation-unit maps naming the declarations to
//! update and the casts that have become redundant; rewriting source text is
//! the caller's business.

#![warn(missing_docs)]

pub mod constraints;
pub mod hierarchy;
pub mod model;
pub mod solver;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;
