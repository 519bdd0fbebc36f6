//! Deterministic synthetic ADI observations.
//!
//! Frames follow the workspace conventions: `x` is the column, `y` the row,
//! the center of an `n`-pixel axis is pixel `n / 2`, and a companion at
//! position angle `theta` appears at `theta - angles[i]` in frame `i`.

use ndarray::{Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

const SIGMA_PER_FWHM: f64 = 1.0 / 2.354_820_045_030_949;

/// A point source rotating with the sky.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticCompanion {
    /// Separation in pixels.
    pub radius: f64,
    /// Position angle in degrees, counter-clockwise from +x.
    pub theta: f64,
    /// Peak value of the Gaussian.
    pub amplitude: f64,
}

/// Parameters of a synthetic observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticAdi {
    pub size: usize,
    pub frames: usize,
    /// Total field rotation in degrees, spread evenly around zero.
    pub rotation: f64,
    pub fwhm: f64,
    /// Peak of the static stellar halo and speckle pattern.
    pub speckle_amplitude: f64,
    /// Number of static speckle blobs.
    pub speckles: usize,
    pub noise_sigma: f64,
    pub seed: u64,
    pub psf_size: usize,
    pub companions: Vec<SyntheticCompanion>,
}

impl Default for SyntheticAdi {
    fn default() -> Self {
        Self {
            size: 64,
            frames: 30,
            rotation: 60.0,
            fwhm: 4.0,
            speckle_amplitude: 5.0,
            speckles: 40,
            noise_sigma: 0.05,
            seed: 7,
            psf_size: 21,
            companions: Vec::new(),
        }
    }
}

/// A generated observation.
#[derive(Debug, Clone)]
pub struct AdiData {
    pub cube: Array3<f64>,
    pub angles: Vec<f64>,
    /// Off-axis PSF: a centered Gaussian with unit peak.
    pub psf: Array2<f64>,
}

/// Centered Gaussian of the given FWHM and peak value.
pub fn gaussian_psf(size: usize, fwhm: f64, amplitude: f64) -> Array2<f64> {
    let c = (size / 2) as f64;
    gaussian_at(size, size, c, c, fwhm, amplitude)
}

fn gaussian_at(ny: usize, nx: usize, y0: f64, x0: f64, fwhm: f64, amplitude: f64) -> Array2<f64> {
    let sigma = fwhm * SIGMA_PER_FWHM;
    let two_s2 = 2.0 * sigma * sigma;
    Array2::from_shape_fn((ny, nx), |(y, x)| {
        let r2 = (y as f64 - y0).powi(2) + (x as f64 - x0).powi(2);
        amplitude * (-r2 / two_s2).exp()
    })
}

/// Parallactic angles spread evenly over `rotation` degrees, centered on zero.
pub fn linear_angles(frames: usize, rotation: f64) -> Vec<f64> {
    if frames < 2 {
        return vec![0.0; frames];
    }
    let step = rotation / (frames - 1) as f64;
    (0..frames)
        .map(|i| -rotation / 2.0 + i as f64 * step)
        .collect()
}

impl SyntheticAdi {
    /// Add a companion, builder style.
    pub fn with_companion(mut self, radius: f64, theta: f64, amplitude: f64) -> Self {
        self.companions.push(SyntheticCompanion {
            radius,
            theta,
            amplitude,
        });
        self
    }

    pub fn center(&self) -> f64 {
        (self.size / 2) as f64
    }

    /// `(x, y)` of a companion once the cube is de-rotated.
    pub fn companion_xy(&self, companion: &SyntheticCompanion) -> (f64, f64) {
        let theta = companion.theta.to_radians();
        let c = self.center();
        (
            c + companion.radius * theta.cos(),
            c + companion.radius * theta.sin(),
        )
    }

    /// Two static patterns: a smooth halo with speckle blobs, and a fainter
    /// independent blob field. Frames mix them with slowly varying weights.
    fn speckle_patterns(&self, rng: &mut StdRng) -> (Array2<f64>, Array2<f64>) {
        let n = self.size;
        let c = self.center();
        let halo_scale = 2.0 * self.fwhm;
        let mut primary = Array2::from_shape_fn((n, n), |(y, x)| {
            let r2 = (y as f64 - c).powi(2) + (x as f64 - c).powi(2);
            self.speckle_amplitude / (1.0 + r2 / (halo_scale * halo_scale))
        });
        let mut secondary = Array2::<f64>::zeros((n, n));

        let max_radius = c - self.fwhm;
        for k in 0..self.speckles {
            let r = rng.random_range(self.fwhm..max_radius.max(self.fwhm + 1.0));
            let phi = rng.random_range(0.0..2.0 * PI);
            let amp = self.speckle_amplitude * rng.random_range(0.05..0.3);
            let blob = gaussian_at(n, n, c + r * phi.sin(), c + r * phi.cos(), self.fwhm, amp);
            if k % 2 == 0 {
                primary += &blob;
            } else {
                secondary += &blob;
            }
        }
        (primary, secondary)
    }

    pub fn build(&self) -> AdiData {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = self.size;
        let angles = linear_angles(self.frames, self.rotation);
        let (primary, secondary) = self.speckle_patterns(&mut rng);
        let noise = Normal::new(0.0, self.noise_sigma.max(0.0)).expect("valid noise sigma");
        let c = self.center();

        let mut cube = Array3::<f64>::zeros((self.frames, n, n));
        for (i, mut frame) in cube.axis_iter_mut(Axis(0)).enumerate() {
            let phase = 2.0 * PI * i as f64 / self.frames.max(1) as f64;
            frame.assign(&(&primary * (1.0 + 0.05 * phase.sin())));
            frame.scaled_add(0.5 + 0.3 * phase.cos(), &secondary);

            for companion in &self.companions {
                let theta = (companion.theta - angles[i]).to_radians();
                let x0 = c + companion.radius * theta.cos();
                let y0 = c + companion.radius * theta.sin();
                frame += &gaussian_at(n, n, y0, x0, self.fwhm, companion.amplitude);
            }
            frame.mapv_inplace(|v| v + noise.sample(&mut rng));
        }

        AdiData {
            cube,
            angles,
            psf: gaussian_psf(self.psf_size, self.fwhm, 1.0),
        }
    }
}
