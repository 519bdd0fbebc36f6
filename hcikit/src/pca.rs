//! PCA speckle subtraction for ADI cubes.
//!
//! Both variants build an orthonormal basis from reference frames, subtract
//! each frame's projection onto it, then de-rotate and collapse the
//! residuals. [`pca_fullframe`] uses every frame as reference for the whole
//! image; [`pca_annular`] works annulus by annulus and excludes, for each
//! target frame, references whose field rotation is too small to have moved
//! a companion by the requested fraction of a FWHM.

use crate::frame::{
    annulus_indices, cube_collapse, cube_derotate, dist, frame_center, Collapse, FrameError,
};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Eigenvalues below this fraction of the largest are treated as zero.
const EIGEN_FLOOR: f64 = 1e-12;

#[derive(Error, Debug)]
pub enum PcaError {
    #[error("need at least 2 frames, got {0}")]
    NotEnoughFrames(usize),
    #[error("{angles} angles given for a cube of {frames} frames")]
    AngleCountMismatch { frames: usize, angles: usize },
    #[error("ncomp must be at least 1")]
    ZeroComponents,
    #[error("ncomp {ncomp} exceeds the {max} available frames")]
    TooManyComponents { ncomp: usize, max: usize },
    #[error("frame {frame} in annulus {annulus}: {found} reference frames, need {required}")]
    TooFewReferenceFrames {
        frame: usize,
        annulus: usize,
        found: usize,
        required: usize,
    },
    #[error("no annulus fits between radius {radius_int} and the edge of a {size}px frame with asize {asize}")]
    NoAnnuli {
        radius_int: f64,
        asize: f64,
        size: usize,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Pre-processing applied to the data matrix before building the basis.
///
/// `Temp*` act per pixel across frames, `Spat*` per frame across pixels.
/// `*Standard` additionally scales to unit variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scaling {
    #[default]
    None,
    TempMean,
    SpatMean,
    TempStandard,
    SpatStandard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaOptions {
    pub ncomp: usize,
    pub scaling: Scaling,
    /// Zero pixels within this radius (px) of the center before fitting.
    pub mask_center_px: Option<f64>,
    pub collapse: Collapse,
}

impl Default for PcaOptions {
    fn default() -> Self {
        Self {
            ncomp: 1,
            scaling: Scaling::None,
            mask_center_px: None,
            collapse: Collapse::Median,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnularOptions {
    pub ncomp: usize,
    /// Inner radius (px) of the first annulus.
    pub radius_int: f64,
    pub fwhm: f64,
    /// Annulus width in pixels.
    pub asize: f64,
    /// Required rotation in FWHM, for the innermost and outermost annulus.
    pub delta_rot: (f64, f64),
    pub min_frames_lib: usize,
    pub max_frames_lib: usize,
    pub scaling: Scaling,
    pub collapse: Collapse,
}

impl Default for AnnularOptions {
    fn default() -> Self {
        Self {
            ncomp: 1,
            radius_int: 0.0,
            fwhm: 4.0,
            asize: 4.0,
            delta_rot: (0.1, 1.0),
            min_frames_lib: 2,
            max_frames_lib: 200,
            scaling: Scaling::None,
            collapse: Collapse::Median,
        }
    }
}

/// Residual products of a PCA reduction.
///
/// Companions survive in `frame` because the stellar pattern is fixed in the
/// detector frame while the sky rotates with the parallactic angle.
#[derive(Debug, Clone)]
pub struct PcaResult {
    /// De-rotated, collapsed residual frame.
    pub frame: Array2<f64>,
    /// Per-frame residuals in the detector orientation.
    pub residuals: Array3<f64>,
    /// Residuals de-rotated so the sky is aligned across frames.
    pub residuals_derot: Array3<f64>,
}

/// Apply `scaling` in place to an `n_frames x n_pixels` matrix.
pub fn apply_scaling(matrix: &mut Array2<f64>, scaling: Scaling) {
    let (axis, standardize) = match scaling {
        Scaling::None => return,
        Scaling::TempMean => (Axis(0), false),
        Scaling::TempStandard => (Axis(0), true),
        Scaling::SpatMean => (Axis(1), false),
        Scaling::SpatStandard => (Axis(1), true),
    };
    // Lanes along `axis` are the samples a statistic is taken over
    for mut lane in matrix.lanes_mut(axis) {
        let n = lane.len();
        if n == 0 {
            continue;
        }
        let mean = lane.sum() / n as f64;
        lane.mapv_inplace(|v| v - mean);
        if standardize {
            let std = (lane.iter().map(|v| v * v).sum::<f64>() / n as f64).sqrt();
            if std > 0.0 {
                lane.mapv_inplace(|v| v / std);
            }
        }
    }
}

/// Leading principal axes of the rows of `matrix` (`n x p`).
///
/// Returns a `k x p` matrix of orthonormal rows, `k <= ncomp`; fewer rows come
/// back when the matrix has lower rank.
pub fn principal_components(matrix: &ArrayView2<f64>, ncomp: usize) -> Result<Array2<f64>, PcaError> {
    if ncomp == 0 {
        return Err(PcaError::ZeroComponents);
    }
    let (n, p) = matrix.dim();
    if n == 0 {
        return Ok(Array2::zeros((0, p)));
    }

    let gram = matrix.dot(&matrix.t());
    let eigen = SymmetricEigen::new(DMatrix::from_fn(n, n, |i, j| gram[[i, j]]));

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
    let largest = eigen.eigenvalues[order[0]];
    if !(largest > 0.0) {
        return Ok(Array2::zeros((0, p)));
    }

    let mut axes: Vec<Array1<f64>> = Vec::with_capacity(ncomp.min(n));
    for &idx in order.iter().take(ncomp) {
        let lambda = eigen.eigenvalues[idx];
        if lambda <= EIGEN_FLOOR * largest {
            break;
        }
        let u = eigen.eigenvectors.column(idx);
        let mut axis = Array1::<f64>::zeros(p);
        for (i, row) in matrix.outer_iter().enumerate() {
            axis.scaled_add(u[i], &row);
        }
        axis /= lambda.sqrt();
        axes.push(axis);
    }

    let mut basis = Array2::zeros((axes.len(), p));
    for (mut row, axis) in basis.outer_iter_mut().zip(axes) {
        row.assign(&axis);
    }
    Ok(basis)
}

/// Rows of `matrix` minus their projection onto the rows of `basis`.
pub fn subtract_projection(matrix: &ArrayView2<f64>, basis: &ArrayView2<f64>) -> Array2<f64> {
    let coefficients = matrix.dot(&basis.t());
    matrix - &coefficients.dot(basis)
}

fn validate_cube(cube: &ArrayView3<f64>, angles: &[f64], ncomp: usize) -> Result<usize, PcaError> {
    let frames = cube.len_of(Axis(0));
    if frames < 2 {
        return Err(PcaError::NotEnoughFrames(frames));
    }
    if angles.len() != frames {
        return Err(PcaError::AngleCountMismatch {
            frames,
            angles: angles.len(),
        });
    }
    if ncomp == 0 {
        return Err(PcaError::ZeroComponents);
    }
    Ok(frames)
}

fn finish(
    residuals: Array3<f64>,
    angles: &[f64],
    collapse: Collapse,
) -> Result<PcaResult, PcaError> {
    let residuals_derot = cube_derotate(&residuals.view(), angles)?;
    let frame = cube_collapse(&residuals_derot.view(), collapse)?;
    Ok(PcaResult {
        frame,
        residuals,
        residuals_derot,
    })
}

/// Full-frame PCA: one basis from all frames, applied to the whole image.
pub fn pca_fullframe(
    cube: &ArrayView3<f64>,
    angles: &[f64],
    options: &PcaOptions,
) -> Result<PcaResult, PcaError> {
    let frames = validate_cube(cube, angles, options.ncomp)?;
    if options.ncomp > frames {
        return Err(PcaError::TooManyComponents {
            ncomp: options.ncomp,
            max: frames,
        });
    }
    let (_, ny, nx) = cube.dim();

    let mut matrix = cube.to_owned().into_shape_with_order((frames, ny * nx))?;
    let masked: Vec<usize> = match options.mask_center_px {
        Some(radius) => {
            let (cy, cx) = frame_center((ny, nx));
            (0..ny * nx)
                .filter(|&k| dist(cy, cx, (k / nx) as f64, (k % nx) as f64) < radius)
                .collect()
        }
        None => Vec::new(),
    };
    for &k in &masked {
        matrix.column_mut(k).fill(0.0);
    }
    apply_scaling(&mut matrix, options.scaling);

    let basis = principal_components(&matrix.view(), options.ncomp)?;
    log::debug!(
        "full-frame PCA: {} frames, {} components kept of {} requested",
        frames,
        basis.nrows(),
        options.ncomp
    );
    let mut residual_matrix = subtract_projection(&matrix.view(), &basis.view());
    for &k in &masked {
        residual_matrix.column_mut(k).fill(0.0);
    }

    let residuals = residual_matrix.into_shape_with_order((frames, ny, nx))?;
    finish(residuals, angles, options.collapse)
}

/// Parallactic-angle threshold (degrees) for an annulus centred at `ann_center` px.
///
/// A companion at that radius moves `delta_rot * fwhm` pixels for this
/// rotation. The threshold is capped at 90% of half the total rotation.
pub fn pa_threshold(ann_center: f64, fwhm: f64, delta_rot: f64, angles: &[f64]) -> f64 {
    let threshold = (2.0 * (delta_rot * fwhm / (2.0 * ann_center)).atan()).to_degrees();
    let max = angles.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = angles.iter().copied().fold(f64::INFINITY, f64::min);
    let mid_range = (max - min).abs() / 2.0;
    if threshold >= 0.9 * mid_range {
        0.9 * mid_range
    } else {
        threshold
    }
}

/// Reference frames for `frame`: those rotated by at least `threshold` degrees.
///
/// When more than `max_frames` qualify, the ones closest in angle are kept.
/// Indices come back in ascending order.
pub fn reference_library(angles: &[f64], frame: usize, threshold: f64, max_frames: usize) -> Vec<usize> {
    let target = angles[frame];
    let mut candidates: Vec<(f64, usize)> = angles
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != frame)
        .map(|(j, &a)| ((a - target).abs(), j))
        .filter(|&(sep, _)| sep >= threshold)
        .collect();
    if candidates.len() > max_frames {
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates.truncate(max_frames);
    }
    let mut library: Vec<usize> = candidates.into_iter().map(|(_, j)| j).collect();
    library.sort_unstable();
    library
}

/// Required rotation (in FWHM) of annulus `annulus` out of `n_annuli`,
/// linear from `delta_rot.0` at the innermost to `delta_rot.1` at the
/// outermost. A single annulus uses the inner value.
pub fn annulus_delta_rot(delta_rot: (f64, f64), annulus: usize, n_annuli: usize) -> f64 {
    if n_annuli > 1 {
        let t = annulus as f64 / (n_annuli - 1) as f64;
        delta_rot.0 + t * (delta_rot.1 - delta_rot.0)
    } else {
        delta_rot.0
    }
}

struct AnnulusResidual {
    pixels: Vec<(usize, usize)>,
    residuals: Array2<f64>,
}

fn subtract_annulus(
    cube: &ArrayView3<f64>,
    angles: &[f64],
    options: &AnnularOptions,
    annulus: usize,
    n_annuli: usize,
) -> Result<AnnulusResidual, PcaError> {
    let (frames, ny, nx) = cube.dim();
    let inner = options.radius_int + annulus as f64 * options.asize;
    let center = inner + options.asize / 2.0;
    let delta_rot = annulus_delta_rot(options.delta_rot, annulus, n_annuli);
    let threshold = pa_threshold(center, options.fwhm, delta_rot, angles);

    let pixels = annulus_indices((ny, nx), inner, options.asize);
    let mut matrix = Array2::<f64>::zeros((frames, pixels.len()));
    for (i, mut row) in matrix.outer_iter_mut().enumerate() {
        for (value, &(y, x)) in row.iter_mut().zip(&pixels) {
            *value = cube[[i, y, x]];
        }
    }
    apply_scaling(&mut matrix, options.scaling);
    log::debug!(
        "annulus {}: r=[{:.1}, {:.1}) px, {} pixels, PA threshold {:.2} deg",
        annulus,
        inner,
        inner + options.asize,
        pixels.len(),
        threshold
    );

    let mut residuals = Array2::<f64>::zeros((frames, pixels.len()));
    for i in 0..frames {
        let library = reference_library(angles, i, threshold, options.max_frames_lib);
        if library.len() < options.min_frames_lib.max(1) {
            return Err(PcaError::TooFewReferenceFrames {
                frame: i,
                annulus,
                found: library.len(),
                required: options.min_frames_lib.max(1),
            });
        }
        let reference = matrix.select(Axis(0), &library);
        let basis = principal_components(&reference.view(), options.ncomp.min(library.len()))?;
        let target = matrix.slice(ndarray::s![i..i + 1, ..]);
        let residual = subtract_projection(&target, &basis.view());
        residuals.row_mut(i).assign(&residual.row(0));
    }

    Ok(AnnulusResidual { pixels, residuals })
}

/// Annular PCA with a per-frame, rotation-aware reference library.
///
/// The frame is split into annuli of `asize` pixels starting at
/// `radius_int`. In each annulus and for each frame, the reference library
/// holds the frames rotated far enough for a companion at the annulus
/// center to move `delta_rot` FWHM (see [`annulus_delta_rot`] and
/// [`pa_threshold`]). The first `ncomp` principal components of that library,
/// or as many as it has frames, are projected out. Annuli run in parallel.
///
/// # Arguments
/// * `cube` - ADI cube `(frames, ny, nx)`
/// * `angles` - Parallactic angle of each frame in degrees
/// * `options` - Annulus geometry, rotation requirement and library limits
///
/// # Returns
/// * `Ok(PcaResult)` - Residuals outside the annuli are zero
/// * `Err(PcaError)` - Invalid geometry, too few frames or angles, or a
///   library smaller than `min_frames_lib`
///
/// # Usage
/// ```
/// use hcikit::pca::{pca_annular, AnnularOptions};
/// use ndarray::Array3;
///
/// let cube = Array3::from_shape_fn((10, 24, 24), |(i, y, x)| {
///     (1.0 + 0.05 * i as f64) * ((y as f64 * 0.7).sin() + (x as f64 * 0.3).cos() + 3.0)
/// });
/// let angles: Vec<f64> = (0..10).map(|i| i as f64 * 8.0).collect();
/// let options = AnnularOptions { ncomp: 2, ..Default::default() };
/// let result = pca_annular(&cube.view(), &angles, &options).unwrap();
/// assert_eq!(result.frame.dim(), (24, 24));
/// ```
pub fn pca_annular(
    cube: &ArrayView3<f64>,
    angles: &[f64],
    options: &AnnularOptions,
) -> Result<PcaResult, PcaError> {
    let frames = validate_cube(cube, angles, options.ncomp)?;
    if !(options.asize > 0.0) {
        return Err(PcaError::InvalidParameter(format!(
            "asize must be positive, got {}",
            options.asize
        )));
    }
    if !(options.fwhm > 0.0) {
        return Err(PcaError::InvalidParameter(format!(
            "fwhm must be positive, got {}",
            options.fwhm
        )));
    }
    if options.radius_int < 0.0 {
        return Err(PcaError::InvalidParameter(format!(
            "radius_int must not be negative, got {}",
            options.radius_int
        )));
    }

    let (_, ny, nx) = cube.dim();
    let n_annuli = ((ny as f64 / 2.0 - options.radius_int) / options.asize).floor();
    if n_annuli < 1.0 {
        return Err(PcaError::NoAnnuli {
            radius_int: options.radius_int,
            asize: options.asize,
            size: ny,
        });
    }
    let n_annuli = n_annuli as usize;
    log::debug!(
        "annular PCA: {} frames, {} annuli of {} px, ncomp {}",
        frames,
        n_annuli,
        options.asize,
        options.ncomp
    );

    let annuli = (0..n_annuli)
        .into_par_iter()
        .map(|k| subtract_annulus(cube, angles, options, k, n_annuli))
        .collect::<Result<Vec<_>, _>>()?;

    let mut residuals = Array3::<f64>::zeros((frames, ny, nx));
    for annulus in annuli {
        for (i, row) in annulus.residuals.outer_iter().enumerate() {
            for (&value, &(y, x)) in row.iter().zip(&annulus.pixels) {
                residuals[[i, y, x]] = value;
            }
        }
    }
    finish(residuals, angles, options.collapse)
}
