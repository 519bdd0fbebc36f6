//! PSF characterisation and normalization.
//!
//! The FWHM is measured with a weighted least-squares fit of
//! `ln I = a + b*x + c*x^2 + d*y + e*y^2`, i.e. an axis-aligned 2-D Gaussian,
//! over the bright core of the PSF.

use crate::frame::{frame_center, frame_crop, frame_shift, FrameError};
use crate::photometry::aperture_sum;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// FWHM in units of the Gaussian sigma: `2 * sqrt(2 ln 2)`.
pub const SIGMA_TO_FWHM: f64 = 2.354_820_045_030_949;

/// Side of the fitting box around the brightest pixel.
pub const DEFAULT_FIT_WINDOW: usize = 11;

/// Pixels fainter than this fraction of the peak are left out of the fit.
const FIT_FLOOR: f64 = 0.1;

const RECENTER_TOLERANCE_PX: f64 = 0.01;
const MAX_RECENTER_PASSES: usize = 3;

#[derive(Error, Debug)]
pub enum PsfError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("only {found} pixels above 10% of the peak, need at least 6")]
    TooFewPixels { found: usize },
    #[error("PSF peak is not positive")]
    NonPositivePeak,
    #[error("gaussian fit is degenerate")]
    DegenerateFit,
    #[error("invalid FWHM {0}")]
    InvalidFwhm(f64),
    #[error("PSF flux in the 1-FWHM aperture is not positive: {0}")]
    NonPositiveFlux(f64),
}

/// Result of [`fit_2d_gaussian`]. Positions are `(x, y)` = (column, row).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    pub x: f64,
    pub y: f64,
    pub fwhm_x: f64,
    pub fwhm_y: f64,
    pub amplitude: f64,
}

impl GaussianFit {
    /// Mean of the two axis FWHMs.
    pub fn fwhm(&self) -> f64 {
        0.5 * (self.fwhm_x + self.fwhm_y)
    }
}

/// Fit an axis-aligned 2-D Gaussian to the core of `frame`.
pub fn fit_2d_gaussian(frame: &ArrayView2<f64>, window: usize) -> Result<GaussianFit, PsfError> {
    let (ny, nx) = frame.dim();
    let mut peak = f64::NEG_INFINITY;
    let (mut py, mut px) = (0usize, 0usize);
    for ((y, x), &v) in frame.indexed_iter() {
        if v > peak {
            peak = v;
            py = y;
            px = x;
        }
    }
    if !(peak > 0.0) {
        return Err(PsfError::NonPositivePeak);
    }

    let half = window.max(3) / 2;
    let y_range = py.saturating_sub(half)..(py + half + 1).min(ny);
    let x_range = px.saturating_sub(half)..(px + half + 1).min(nx);

    // Normal equations of the weighted fit, weights I^2 (var of ln I ~ 1/I^2)
    let mut ata = DMatrix::<f64>::zeros(5, 5);
    let mut atb = DVector::<f64>::zeros(5);
    let mut used = 0usize;
    for y in y_range {
        for x in x_range.clone() {
            let v = frame[[y, x]];
            if v <= FIT_FLOOR * peak {
                continue;
            }
            let dx = x as f64 - px as f64;
            let dy = y as f64 - py as f64;
            let row = [1.0, dx, dx * dx, dy, dy * dy];
            let w = v * v;
            let target = v.ln();
            for i in 0..5 {
                atb[i] += w * row[i] * target;
                for j in 0..5 {
                    ata[(i, j)] += w * row[i] * row[j];
                }
            }
            used += 1;
        }
    }
    if used < 6 {
        return Err(PsfError::TooFewPixels { found: used });
    }

    let solution = ata
        .cholesky()
        .ok_or(PsfError::DegenerateFit)?
        .solve(&atb);
    let (a, b, c, d, e) = (
        solution[0],
        solution[1],
        solution[2],
        solution[3],
        solution[4],
    );
    if !(c < 0.0 && e < 0.0) {
        return Err(PsfError::DegenerateFit);
    }

    let offset_x = -b / (2.0 * c);
    let offset_y = -d / (2.0 * e);
    let sigma_x = (-1.0 / (2.0 * c)).sqrt();
    let sigma_y = (-1.0 / (2.0 * e)).sqrt();
    let amplitude = (a - b * b / (4.0 * c) - d * d / (4.0 * e)).exp();

    Ok(GaussianFit {
        x: px as f64 + offset_x,
        y: py as f64 + offset_y,
        fwhm_x: SIGMA_TO_FWHM * sigma_x,
        fwhm_y: SIGMA_TO_FWHM * sigma_y,
        amplitude,
    })
}

/// How the FWHM used for normalization is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FwhmSpec {
    #[default]
    Fit,
    Fixed(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeOptions {
    pub fwhm: FwhmSpec,
    /// Crop to this size before anything else.
    pub size: Option<usize>,
    /// Make the cropped PSF odd-sized so its peak sits on a pixel.
    pub force_odd: bool,
    /// Values below this (after normalization) are zeroed.
    pub threshold: Option<f64>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            fwhm: FwhmSpec::Fit,
            size: None,
            force_odd: true,
            threshold: None,
        }
    }
}

/// Off-axis PSF ready for injection and S/N apertures.
///
/// The peak sits on the central pixel and a 1-FWHM aperture around it sums
/// to 1, so an injected flux is expressed in units of the original PSF.
#[derive(Debug, Clone)]
pub struct NormalizedPsf {
    /// Cropped, recentred PSF with unit flux in a 1-FWHM aperture.
    pub psf: Array2<f64>,
    /// Flux of the input PSF in a 1-FWHM aperture.
    pub flux: f64,
    /// Fitted or given FWHM in pixels.
    pub fwhm: f64,
}

fn target_size(min_dim: usize, requested: Option<usize>, force_odd: bool) -> usize {
    let size = requested.unwrap_or(min_dim);
    if !force_odd || size % 2 == 1 {
        return size;
    }
    if requested.is_some() && size < min_dim {
        size + 1
    } else {
        size.saturating_sub(1)
    }
}

/// Crop, center and scale a PSF to unit flux in a 1-FWHM aperture.
///
/// The PSF is cropped around its center (to an odd size unless disabled),
/// its FWHM is fitted or taken from the options, and it is shifted in
/// Fourier space until the fitted peak lies within a hundredth of a pixel
/// of the center.
///
/// # Arguments
/// * `psf` - Off-axis PSF frame
/// * `options` - Crop size, FWHM source and zeroing threshold
///
/// # Returns
/// * `Ok(NormalizedPsf)` - Normalized PSF, its original aperture flux and FWHM
/// * `Err(PsfError)` - Crop larger than the frame, failed Gaussian fit, or a
///   non-positive FWHM or aperture flux
///
/// # Usage
/// ```
/// use hcikit::psf::{normalize_psf, NormalizeOptions};
/// use ndarray::Array2;
///
/// let psf = Array2::from_shape_fn((22, 22), |(y, x)| {
///     let r2 = (y as f64 - 11.0).powi(2) + (x as f64 - 11.0).powi(2);
///     300.0 * (-r2 / 8.0).exp()
/// });
/// let normalized = normalize_psf(&psf.view(), &NormalizeOptions::default()).unwrap();
/// assert_eq!(normalized.psf.dim(), (21, 21));
/// assert!((normalized.fwhm - 4.71).abs() < 0.1);
/// ```
pub fn normalize_psf(
    psf: &ArrayView2<f64>,
    options: &NormalizeOptions,
) -> Result<NormalizedPsf, PsfError> {
    let (ny, nx) = psf.dim();
    let size = target_size(ny.min(nx), options.size, options.force_odd);
    let mut frame = if size == ny && size == nx {
        psf.to_owned()
    } else {
        frame_crop(psf, size)?
    };

    let fwhm = match options.fwhm {
        FwhmSpec::Fit => fit_2d_gaussian(&frame.view(), DEFAULT_FIT_WINDOW)?.fwhm(),
        FwhmSpec::Fixed(value) => value,
    };
    if !(fwhm.is_finite() && fwhm > 0.0) {
        return Err(PsfError::InvalidFwhm(fwhm));
    }
    log::debug!("PSF {}x{} with FWHM {:.3} px", size, size, fwhm);

    let (cy, cx) = frame_center(frame.dim());
    for pass in 0..MAX_RECENTER_PASSES {
        let fit = match fit_2d_gaussian(&frame.view(), DEFAULT_FIT_WINDOW) {
            Ok(fit) => fit,
            Err(e) if matches!(options.fwhm, FwhmSpec::Fixed(_)) => {
                log::warn!("PSF centroid fit failed, not recentering: {e}");
                break;
            }
            Err(e) => return Err(e),
        };
        let (dy, dx) = (cy - fit.y, cx - fit.x);
        if dy.hypot(dx) <= RECENTER_TOLERANCE_PX {
            break;
        }
        log::debug!("recentering PSF by ({:.3}, {:.3}) px, pass {}", dy, dx, pass + 1);
        frame = frame_shift(&frame.view(), dy, dx);
    }

    let flux = aperture_sum(&frame.view(), cx, cy, fwhm / 2.0);
    if !(flux > 0.0) {
        return Err(PsfError::NonPositiveFlux(flux));
    }
    frame.mapv_inplace(|v| v / flux);
    if let Some(threshold) = options.threshold {
        frame.mapv_inplace(|v| if v < threshold { 0.0 } else { v });
    }

    Ok(NormalizedPsf {
        psf: frame,
        flux,
        fwhm,
    })
}
