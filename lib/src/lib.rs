#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]

//! This library expands segmented nuclei into cells and quantifies the resulting regions.
//!
//! Nuclei masks are paired with intensity images by file name, each mask is expanded into
//! nuclei, cell and cytoplasm label images, and shape and per-channel intensity statistics are
//! collected for every region into a single CSV table.
//!
//! # Example
//!
//! ```no_run
//! extern crate cellexp_rs;
//!
//! use cellexp_rs::{JobContext, Parameters};
//!
//! fn main() {
//!     let context = JobContext::new(Some("masks/".into()), Some("results/".into()))
//!         .unwrap()
//!         .with_suffixes(&[".tif"]);
//!
//!     let summary = cellexp_rs::run(context, Parameters::default()).unwrap();
//!
//!     println!("Wrote {} rows to {:?}", summary.rows, summary.table);
//! }
//! ```

use ndarray::{Array2, ArrayD};

/// Run parameters and their parsing
pub mod config;
/// Errors raised while processing images
pub mod error;
/// Growing nuclei into cells
pub mod expansion;
/// Raster file reading and label image writing
pub mod images;
/// Job directories and file discovery
pub mod job;
/// Label image kinds and conversion of rasters to labels
pub mod labels;
/// Per-region statistics
pub mod metrics;
/// Matching masks to intensity images
pub mod pairing;
/// End-to-end processing of a job
pub mod pipeline;
/// Accumulating and writing the metrics table
pub mod table;

mod channel;
mod region;

pub use self::channel::{
    normalise_channel_name, normalise_channel_names, IntensityStack, MASK_CHANNEL_NAME,
};
pub use self::config::Parameters;
pub use self::error::{CellExpError, Result};
pub use self::expansion::{CellExpansion, ExpandedLabels, NearestNucleusExpansion};
pub use self::job::{ImageRecord, JobContext};
pub use self::labels::LabelKind;
pub use self::metrics::{extract_label_metrics, ImageWarnings, MetricsRow};
pub use self::pipeline::{run, Pipeline, RunSummary};
pub use self::region::{regions, BoundingBox, Region, RegionProperties};
pub use self::table::MetricsTable;

/// A 2-D label image; `0` is background and every other value identifies an object
pub type LabelArray = Array2<u32>;

/// An n-dimensional raster as read from disk
pub type Raster = ArrayD<f64>;
