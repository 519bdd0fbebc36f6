//! Detectability study of full-frame versus annular PCA.
//!
//! Loads an ADI dataset, sweeps the number of principal components for both
//! reductions, measures companion S/N in the residual frames and renders the
//! results as figures and a JSON report.

pub mod args;
pub mod dataset;
pub mod plots;
pub mod report;
pub mod scenario;
pub mod sweep;

pub use args::{NcompList, PlotFormat, StudyArgs};
pub use dataset::Dataset;
pub use scenario::Scenario;
pub use sweep::{detection_sweep, injection_sweep, DetectionSweep, InjectionSweep, SnrSeries, SourceSeries};
