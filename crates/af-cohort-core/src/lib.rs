//! AF Cohort Core Library
//!
//! Stroke and bleeding risk scoring over clinical notes for patients with
//! atrial fibrillation, producing one wide table per run for
//! anticoagulation analysis.
//!
//! # Architecture
//!
//! ```text
//! Note store (FTS5) → Site exclusions → Most recent per patient → Demographics
//!                                                     │
//!                                        [COHORT: eligible documents]
//!                                                     │
//!                                    Annotation (engine output / tagger)
//!                                                     │
//!                         ┌───────────────────────────▼───────────────────────────┐
//!                         │  per score: Aggregate → Augment → Calculate points    │
//!                         │  left-join on the first score, then medication counts │
//!                         └───────────────────────────┬───────────────────────────┘
//!                                                     │
//!                                    Presence flags + antithrombotic categories
//!                                                     │
//!                             ┌───────────────────────┴───────────────────────┐
//!                             ▼                                               ▼
//!                      Wide table (CSV/JSON)                            Run manifest
//! ```
//!
//! # Core Principle
//!
//! **Presence, not frequency.** A component scores its points once however
//! many times it is mentioned, and only affirmed mentions count.
//!
//! # Modules
//!
//! - [`db`]: SQLite note store with FTS5 search
//! - [`models`]: Domain types (documents, annotations, definitions, tables)
//! - [`cohort`]: Cohort selection from the note store
//! - [`annotate`]: Annotators and the per-document annotation batch
//! - [`scoring`]: Definition loading, aggregation, scoring and merging
//! - [`analysis`]: Binary flags and antithrombotic categories
//! - [`export`]: Table writers and the run manifest
//! - [`validation`]: Comparison against a manually annotated sample
//! - [`pipeline`]: End-to-end orchestration
//! - [`config`], [`telemetry`]: Environment configuration and logging

pub mod analysis;
pub mod annotate;
pub mod cohort;
pub mod config;
pub mod db;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod scoring;
pub mod telemetry;
pub mod validation;

// Re-export commonly used types
pub use annotate::{annotate_cohort, AnnotationBatch, AnnotationFailure, Annotator};
pub use cohort::{Cohort, CohortBuilder, CohortCriteria, Demographics, SiteFilter};
pub use config::PipelineConfig;
pub use db::Database;
pub use export::RunManifest;
pub use models::{
    AnnotatedDocument, Annotation, MedicationList, NegationState, ScoreDefinition, ScoreKind, Table,
    Value,
};
pub use pipeline::{Definitions, Pipeline, PipelineError, PipelineResult};
pub use scoring::{DefinitionLoader, RiskScorer, ScoringOutput};
