// src/manifest/mod.rs

//! Formulas and manifests
//!
//! A **formula** is the declarative description of one package across its
//! releases. Selecting a release yields a **manifest**: the immutable
//! record of one buildable version that the pipeline consumes.
//!
//! Manifests carry no behaviour of their own. Build, install and test
//! steps are directive records interpreted by the fixed pipeline stages,
//! which is what makes them validatable up front.

mod category;
mod format;
mod parser;
mod validate;

pub use category::Category;
pub use format::{
    BuildDirective, Formula, InstallDirective, Manifest, PackageSection, Release, Source,
    SourceSection, TestDirective,
};
pub use parser::{parse_formula, parse_formula_file};
pub use validate::{InstallItem, compile_pattern, validate_formula};

#[cfg(test)]
pub(crate) use format::tests::sample_manifest;
