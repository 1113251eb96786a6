//! Smoothing of marker weights and selection of representative peaks.

pub mod filter;
pub mod finder;
pub mod report;

pub use filter::{FilterError, moving_average_filter};
pub use finder::{Peak, PeakError, PeakMode, PeakOptions, find_peaks};
pub use report::{PeakReport, PeakRow, write_rows};
