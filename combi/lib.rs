#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod buffers;
pub mod chunks;
pub mod config;
pub mod encoding;
pub mod io;
pub mod kernel;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod types;
pub mod weights;

#[path = "../svm/mod.rs"]
pub mod svm;

#[path = "../peaks/mod.rs"]
pub mod peaks;

pub use buffers::CombiBuffers;
pub use config::{AnalysisMode, CombiConfig, SignificanceThreshold, SolverBackend};
pub use encoding::GenotypeEncoder;
pub use pipeline::{CombiAnalysis, CombiOutput};
pub use source::{GenotypeSource, InMemoryGenotypes};
pub use types::{CombiError, Genotype, MarkerRecord};
