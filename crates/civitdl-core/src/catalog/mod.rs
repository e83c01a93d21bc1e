//! Catalog access and reference resolution.
//!
//! # Module Organization
//!
//! - [`types`] - API response structs and conversion to domain records
//! - [`client`] - the [`Catalog`] trait and its HTTP implementation
//! - [`resolver`] - reference resolution, version and file selection

mod client;
mod resolver;
mod types;

pub use client::{Catalog, CivitaiClient, ModelDetails};
pub use resolver::{
    select_file, select_version, FileSelection, FileSelector, ReferenceResolver, Resolution,
    ResolvedModel, SelectionPolicy,
};
