//! Per-table SQL operations.
//!
//! Each submodule owns one table (or one tightly-coupled group of catalog
//! tables) and provides plain CRUD-level operations without pipeline
//! business logic. Column names keep the source catalog's camelCase quoted
//! identifiers; result columns are aliased to snake_case for row mapping.

pub mod lead_sequence_state;
pub mod leads;
pub mod outbox;
pub mod sequence_steps;

pub use lead_sequence_state::LeadSequenceStates;
pub use leads::Leads;
pub use outbox::Outbox;
pub use sequence_steps::SequenceSteps;
