//! Clinical concept annotation for the AF cohort pipeline.
//!
//! Both annotation sources produce the same [`Entity`] shape, which mirrors
//! the JSON contract of the external annotation engine:
//!
//! - [`extraction`]: parse the JSON emitted by the external engine
//! - [`tagger`]: in-process dictionary tagger with NegEx-style negation

pub mod cues;
pub mod extraction;
pub mod tagger;

pub use extraction::*;
pub use tagger::*;
