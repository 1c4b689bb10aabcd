//! Domain models for the AF cohort pipeline.

mod definition;
mod document;
mod table;

pub use definition::*;
pub use document::*;
pub use table::*;
