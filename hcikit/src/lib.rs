//! High-contrast imaging primitives for angular differential imaging (ADI).
//!
//! An ADI cube is a stack of `N` frames `(N, ny, nx)` taken while the field
//! rotates, together with one parallactic angle per frame. The modules here
//! cover what a companion detectability study needs:
//!
//! - [`io`]: FITS cubes, frames and angle lists
//! - [`frame`]: geometry, Fourier shifts, rotation and cube collapsing
//! - [`psf`]: Gaussian FWHM fitting and PSF normalization
//! - [`pca`]: full-frame and annular PCA speckle subtraction
//! - [`inject`]: synthetic companions and removal of known ones
//! - [`photometry`] and [`snr`]: aperture sums and the small-sample S/N
//! - [`instrument`]: pixel scales of common imagers

#[cfg(feature = "fits")]
pub mod io;

pub mod frame;
pub mod inject;
pub mod instrument;
pub mod pca;
pub mod photometry;
pub mod psf;
pub mod snr;
pub mod stats;

pub use frame::{cube_collapse, cube_derotate, frame_center, Collapse, FrameError};
pub use inject::{inject_companions, planet_free_cube, CompanionSpec, InjectError, KnownCompanion};
pub use instrument::Instrument;
pub use pca::{pca_annular, pca_fullframe, AnnularOptions, PcaError, PcaOptions, PcaResult, Scaling};
pub use psf::{normalize_psf, NormalizeOptions, NormalizedPsf, PsfError};
pub use snr::{snr, snr_map, SnrError, SnrMeasurement, SnrOptions};
