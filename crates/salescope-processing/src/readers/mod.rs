//! Source readers for the four supported source kinds.
//!
//! Each reader fetches one dataset and returns `Result<DataFrame,
//! PipelineError>` with failures classified into the read taxonomy
//! (`NotFound`, `Configuration`, `Transport`, `Decode`, `Unclassified`).
//! Downgrading failures to empty results is the aggregator's job, not the
//! readers'.

pub mod api;
pub mod csv;
pub mod excel;
pub mod sql;

pub use api::read_api;
pub use csv::read_csv;
pub use excel::read_excel;
pub use sql::read_sql;
