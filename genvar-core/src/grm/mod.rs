//! Genomic relationship matrices.

pub mod dense;

pub use dense::compute_grm;
