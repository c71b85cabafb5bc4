//! Time-bucket resampling of a normalized series.
//!
//! Readings are grouped into fixed, epoch-aligned buckets and each metric
//! is averaged over the readings that actually carry a value for it.

pub mod resample;
pub mod utility;

pub use resample::{Interval, resample};
