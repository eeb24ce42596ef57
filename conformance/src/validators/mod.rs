//! Validators for a NIDM output tree.

pub mod graphs;
pub mod layout;
