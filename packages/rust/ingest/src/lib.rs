//! Delimited-text ingestion for Larder.
//!
//! Turns raw import rows into [`RecordDraft`](larder_shared::RecordDraft)s:
//! - [`fields`]: list splitting and ingredient cell parsing
//! - [`links`]: media link canonicalization
//! - [`row`]: header normalization, the delimited reader, and [`ImportRow`]
//!
//! Everything here is pure and synchronous; reconciliation against the
//! store happens in `larder-core`.

pub mod fields;
pub mod links;
pub mod row;

pub use fields::{LIST_SEPARATORS, STEP_SEPARATORS, parse_ingredient_cell, parse_quantity, split_list};
pub use links::{MEDIA_TEMPLATE_PREFIX, canonicalize};
pub use row::{ImportRow, normalize_header, read_rows};
