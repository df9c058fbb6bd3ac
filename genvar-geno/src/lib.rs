//! genvar-geno: Genotype and input-file access for genvar
//!
//! Provides the byte-per-genotype marker store with scoped sequential
//! passes, PLINK conversion into that store, kernel matrix I/O and the
//! phenotype/covariate table reader.

pub mod kernel_io;
pub mod phenotype;
pub mod plink;
pub mod sample;
pub mod store;

pub use store::{ByteCoding, GenotypeStore, MarkerPass, MarkerSelection, StoreMetadata};
