//! Synthetic companion injection into ADI cubes.

use crate::frame::{fft2, frame_center, frame_crop, polar_offset, shift_spectrum, FrameError};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InjectError {
    #[error("no injection radii given")]
    EmptyRadii,
    #[error("number of branches must be at least 1")]
    ZeroBranches,
    #[error("PSF template is empty")]
    EmptyPsf,
    #[error("{angles} angles given for a cube of {frames} frames")]
    AngleCountMismatch { frames: usize, angles: usize },
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Fake companions to inject: `flux` times the normalized PSF at each radius,
/// on `n_branches` equally spaced position angles starting at `theta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanionSpec {
    pub flux: f64,
    pub radii: Vec<f64>,
    pub theta: f64,
    #[serde(default = "default_branches")]
    pub n_branches: usize,
}

fn default_branches() -> usize {
    1
}

impl CompanionSpec {
    pub fn single(flux: f64, radius: f64, theta: f64) -> Self {
        Self {
            flux,
            radii: vec![radius],
            theta,
            n_branches: 1,
        }
    }

    /// Position angle of branch `b`.
    pub fn branch_theta(&self, branch: usize) -> f64 {
        self.theta + branch as f64 * 360.0 / self.n_branches as f64
    }
}

/// A companion known to be in the data, removed by [`planet_free_cube`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KnownCompanion {
    /// Separation in pixels.
    pub radius: f64,
    pub theta: f64,
    pub flux: f64,
}

#[derive(Debug, Clone)]
pub struct Injection {
    pub cube: Array3<f64>,
    /// `(x, y)` of every injected source in the de-rotated frame,
    /// branch-major then radius.
    pub positions: Vec<(f64, f64)>,
}

/// Place `psf` at the center of an `(ny, nx)` frame.
fn centered_template(psf: &ArrayView2<f64>, shape: (usize, usize)) -> Result<Array2<f64>, InjectError> {
    let (ny, nx) = shape;
    let (py, px) = psf.dim();
    if py == 0 || px == 0 {
        return Err(InjectError::EmptyPsf);
    }
    let psf = if py > ny || px > nx {
        frame_crop(psf, ny.min(nx).min(py).min(px))?
    } else {
        psf.to_owned()
    };
    let (py, px) = psf.dim();

    let mut template = Array2::zeros((ny, nx));
    let y0 = ny / 2 - py / 2;
    let x0 = nx / 2 - px / 2;
    template
        .slice_mut(ndarray::s![y0..y0 + py, x0..x0 + px])
        .assign(&psf);
    Ok(template)
}

/// Add copies of `psf` that rotate with the field.
///
/// In frame `i` a source at `(r, theta)` is placed at position angle
/// `theta - angles[i]`, so it sits at `theta` once the cube is de-rotated.
pub fn inject_companions(
    cube: &ArrayView3<f64>,
    psf: &ArrayView2<f64>,
    angles: &[f64],
    spec: &CompanionSpec,
) -> Result<Injection, InjectError> {
    let (frames, ny, nx) = cube.dim();
    if spec.radii.is_empty() {
        return Err(InjectError::EmptyRadii);
    }
    if spec.n_branches == 0 {
        return Err(InjectError::ZeroBranches);
    }
    if angles.len() != frames {
        return Err(InjectError::AngleCountMismatch {
            frames,
            angles: angles.len(),
        });
    }

    let spectrum = fft2(&centered_template(psf, (ny, nx))?.view());
    let (cy, cx) = frame_center((ny, nx));

    let mut positions = Vec::with_capacity(spec.n_branches * spec.radii.len());
    for branch in 0..spec.n_branches {
        let theta = spec.branch_theta(branch);
        for &r in &spec.radii {
            let (dy, dx) = polar_offset(r, theta);
            positions.push((cx + dx, cy + dy));
            log::debug!(
                "injecting flux {} at r={:.2} px, theta={:.2} deg -> (x={:.2}, y={:.2})",
                spec.flux,
                r,
                theta,
                cx + dx,
                cy + dy
            );
        }
    }

    let injected: Vec<Array2<f64>> = (0..frames)
        .into_par_iter()
        .map(|i| {
            let mut frame = cube.index_axis(Axis(0), i).to_owned();
            for branch in 0..spec.n_branches {
                let theta = spec.branch_theta(branch) - angles[i];
                for &r in &spec.radii {
                    let (dy, dx) = polar_offset(r, theta);
                    frame.scaled_add(spec.flux, &shift_spectrum(&spectrum, dy, dx));
                }
            }
            frame
        })
        .collect();

    let mut out = Array3::zeros((frames, ny, nx));
    for (i, frame) in injected.into_iter().enumerate() {
        out.index_axis_mut(Axis(0), i).assign(&frame);
    }
    Ok(Injection {
        cube: out,
        positions,
    })
}

/// Remove known companions by injecting each with negative flux.
pub fn planet_free_cube(
    planets: &[KnownCompanion],
    cube: &ArrayView3<f64>,
    angles: &[f64],
    psf: &ArrayView2<f64>,
) -> Result<Array3<f64>, InjectError> {
    let mut current = cube.to_owned();
    for planet in planets {
        let spec = CompanionSpec::single(-planet.flux, planet.radius, planet.theta);
        current = inject_companions(&current.view(), psf, angles, &spec)?.cube;
    }
    Ok(current)
}
