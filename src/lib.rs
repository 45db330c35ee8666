//! Converts MindLogger survey exports into a BIDS-like dataset layout.
//!
//! The core is the merge-aware writer: entities (file- or table-backed
//! resources with subject/task/session/run placement) are materialized under
//! a root directory, with JSON/TSV side files merged rather than clobbered
//! and per-entity conflicts resolved by a [`writer::MergeStrategy`].

pub mod archive;
pub mod error;
pub mod export;
pub mod layout;
pub mod model;
pub mod table;
pub mod writer;

pub use error::MindbidsError;
pub use export::MindloggerExport;
pub use layout::BidsLayout;
pub use model::{Builder, Entity, Model, Payload, Resource};
pub use table::Table;
pub use writer::{BidsWriter, MergeStrategy};
