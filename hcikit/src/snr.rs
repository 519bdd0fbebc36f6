//! Signal-to-noise ratio of point sources in residual frames.
//!
//! Uses the small-sample statistic of Mawet et al. (2014): the source
//! aperture is compared against the other resolution elements at the same
//! separation, with a Student-t style penalty for the small number of
//! background samples.

use crate::frame::{dist, frame_center};
use crate::photometry::aperture_sum;
use crate::stats::{mean, std_dev, StatsError};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnrError {
    #[error("source at separation {separation:.2} px is within {min:.2} px of the center")]
    TooCloseToCenter { separation: f64, min: f64 },
    #[error("only {found} background apertures available, need at least 2")]
    TooFewApertures { found: usize },
    #[error("background apertures have zero spread")]
    ZeroNoise,
    #[error("FWHM must be positive, got {0}")]
    InvalidFwhm(f64),
    #[error("statistics error: {0}")]
    Stats(#[from] StatsError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnrOptions {
    /// Leave out the two apertures adjacent to the source, where PCA
    /// self-subtraction leaves negative wings.
    pub exclude_negative_lobes: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnrMeasurement {
    pub x: f64,
    pub y: f64,
    pub snr: f64,
    pub source_flux: f64,
    /// Aperture sums, stepping clockwise from the source.
    pub background_fluxes: Vec<f64>,
}

/// Centers of the `n` apertures on the circle through `(x, y)`, the source first.
///
/// The apertures are `2π / n` apart, so the ring closes on the source. A
/// fixed chord step of `2·asin(fwhm / 2 / sep)` would instead leave a gap
/// smaller than one aperture between the last and the source; at the
/// separations of interest both give nearly the same background sample.
fn aperture_centers(cy: f64, cx: f64, x: f64, y: f64, n: usize) -> Vec<(f64, f64)> {
    let sep = dist(cy, cx, y, x);
    let theta0 = (y - cy).atan2(x - cx);
    let step = 2.0 * PI / n as f64;
    (0..n)
        .map(|k| {
            let theta = theta0 - k as f64 * step;
            (cx + sep * theta.cos(), cy + sep * theta.sin())
        })
        .collect()
}

/// S/N of a source at `(x, y)` in `frame`.
///
/// `floor(2π·sep / fwhm)` apertures of diameter `fwhm` are laid evenly on the
/// circle through the source; the source aperture is compared with the mean
/// of the others and their sample standard deviation, inflated by
/// `sqrt(1 + 1/n_bg)` for the small number of background apertures.
///
/// # Arguments
/// * `frame` - Residual frame, center at `(ny / 2, nx / 2)`
/// * `source` - `(x, y)` pixel position of the source
/// * `fwhm` - PSF FWHM in pixels, also the aperture diameter
/// * `options` - Whether to drop the two apertures next to the source
///
/// # Returns
/// * `Ok(SnrMeasurement)` - S/N, source flux and the background aperture sums
/// * `Err(SnrError)` - Source within `fwhm / 2 + 1` px of the center, fewer
///   than two background apertures, or background with zero spread
///
/// # Usage
/// ```
/// use hcikit::snr::{snr, SnrOptions};
/// use ndarray::Array2;
///
/// let mut frame = Array2::from_shape_fn((41, 41), |(y, x)| ((x * 7 + y * 13) % 5) as f64);
/// frame[[20, 32]] += 100.0;
/// let m = snr(&frame.view(), (32.0, 20.0), 4.0, &SnrOptions::default()).unwrap();
/// assert!(m.snr > 5.0);
/// ```
pub fn snr(
    frame: &ArrayView2<f64>,
    source: (f64, f64),
    fwhm: f64,
    options: &SnrOptions,
) -> Result<SnrMeasurement, SnrError> {
    if !(fwhm > 0.0) {
        return Err(SnrError::InvalidFwhm(fwhm));
    }
    let (x, y) = source;
    let (cy, cx) = frame_center(frame.dim());
    let separation = dist(cy, cx, y, x);
    let min = fwhm / 2.0 + 1.0;
    if separation <= min {
        return Err(SnrError::TooCloseToCenter { separation, min });
    }

    let n_apertures = (2.0 * PI * separation / fwhm).floor() as usize;
    let centers = aperture_centers(cy, cx, x, y, n_apertures);
    let radius = fwhm / 2.0;
    let fluxes: Vec<f64> = centers
        .iter()
        .map(|&(ax, ay)| aperture_sum(frame, ax, ay, radius))
        .collect();

    let background: Vec<f64> = if options.exclude_negative_lobes {
        fluxes
            .iter()
            .copied()
            .skip(2)
            .take(n_apertures.saturating_sub(3))
            .collect()
    } else {
        fluxes.iter().copied().skip(1).collect()
    };
    if background.len() < 2 {
        return Err(SnrError::TooFewApertures {
            found: background.len(),
        });
    }

    let source_flux = fluxes[0];
    let n_bg = background.len() as f64;
    let noise = std_dev(&background, 1)? * (1.0 + 1.0 / n_bg).sqrt();
    if !(noise > 0.0) {
        return Err(SnrError::ZeroNoise);
    }
    let snr = (source_flux - mean(&background)?) / noise;

    Ok(SnrMeasurement {
        x,
        y,
        snr,
        source_flux,
        background_fluxes: fluxes[1..].to_vec(),
    })
}

/// S/N evaluated at every pixel; 0 where it cannot be computed.
pub fn snr_map(frame: &ArrayView2<f64>, fwhm: f64) -> Array2<f64> {
    let (ny, nx) = frame.dim();
    let options = SnrOptions::default();
    let rows: Vec<Vec<f64>> = (0..ny)
        .into_par_iter()
        .map(|y| {
            (0..nx)
                .map(|x| {
                    snr(frame, (x as f64, y as f64), fwhm, &options)
                        .map(|m| m.snr)
                        .unwrap_or(0.0)
                })
                .collect()
        })
        .collect();
    Array2::from_shape_fn((ny, nx), |(y, x)| rows[y][x])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn noise_frame(size: usize) -> Array2<f64> {
        Array2::from_shape_fn((size, size), |(y, x)| {
            ((x * 7919 + y * 104_729) % 1000) as f64 / 1000.0 - 0.5
        })
    }

    fn add_blob(frame: &mut Array2<f64>, x0: f64, y0: f64, amp: f64) {
        for ((y, x), v) in frame.indexed_iter_mut() {
            let r2 = (x as f64 - x0).powi(2) + (y as f64 - y0).powi(2);
            *v += amp * (-r2 / 2.0).exp();
        }
    }

    #[test]
    fn test_bright_source_detected() {
        let mut frame = noise_frame(61);
        add_blob(&mut frame, 50.0, 30.0, 20.0);
        let m = snr(&frame.view(), (50.0, 30.0), 4.0, &SnrOptions::default()).unwrap();
        assert!(m.snr > 5.0, "snr {}", m.snr);
        // sep 20, fwhm 4 -> 31 apertures
        assert_eq!(m.background_fluxes.len(), 30);

        let n = 30.0;
        let mu = m.background_fluxes.iter().sum::<f64>() / n;
        let var = m
            .background_fluxes
            .iter()
            .map(|f| (f - mu).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        let expected = (m.source_flux - mu) / (var.sqrt() * (1.0 + 1.0 / n).sqrt());
        assert_relative_eq!(m.snr, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_apertures_step_clockwise() {
        let mut frame = noise_frame(61);
        let step = 2.0 * PI / 31.0;
        // First background aperture sits at -step from theta = 0
        add_blob(&mut frame, 30.0 + 20.0 * step.cos(), 30.0 - 20.0 * step.sin(), 50.0);
        let m = snr(&frame.view(), (50.0, 30.0), 4.0, &SnrOptions::default()).unwrap();
        let brightest = m
            .background_fluxes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(brightest, Some(0));
    }

    #[test]
    fn test_aperture_ring_is_evenly_spaced_and_closes() {
        let n = 31;
        let centers = aperture_centers(30.0, 30.0, 50.0, 30.0, n);
        assert_eq!(centers.len(), n);
        let chord = 2.0 * 20.0 * (PI / n as f64).sin();
        for k in 0..n {
            let (x0, y0) = centers[k];
            let (x1, y1) = centers[(k + 1) % n];
            assert_relative_eq!(dist(30.0, 30.0, y0, x0), 20.0, epsilon = 1e-9);
            assert_relative_eq!(dist(y0, x0, y1, x1), chord, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_exclude_negative_lobes_drops_neighbours() {
        let mut frame = noise_frame(61);
        add_blob(&mut frame, 50.0, 30.0, 20.0);
        let options = SnrOptions {
            exclude_negative_lobes: true,
        };
        let with = snr(&frame.view(), (50.0, 30.0), 4.0, &options).unwrap();
        let without = snr(&frame.view(), (50.0, 30.0), 4.0, &SnrOptions::default()).unwrap();
        assert_eq!(with.background_fluxes, without.background_fluxes);
        assert_ne!(with.snr, without.snr);
    }

    #[test]
    fn test_rejected_geometries() {
        let frame = noise_frame(41);
        assert!(matches!(
            snr(&frame.view(), (22.0, 20.0), 4.0, &SnrOptions::default()),
            Err(SnrError::TooCloseToCenter { .. })
        ));
        // sep 4.5 px with fwhm 3.5 -> 8 apertures
        assert!(snr(&frame.view(), (24.5, 20.0), 3.5, &SnrOptions::default()).is_ok());
        assert!(matches!(
            snr(&frame.view(), (24.5, 20.0), 8.0, &SnrOptions::default()),
            Err(SnrError::TooCloseToCenter { .. })
        ));
        assert!(matches!(
            snr(&frame.view(), (30.0, 20.0), 0.0, &SnrOptions::default()),
            Err(SnrError::InvalidFwhm(_))
        ));
    }

    #[test]
    fn test_too_few_apertures() {
        let frame = noise_frame(41);
        // sep 6, fwhm 8 -> 4 apertures: 3 background, 1 once the lobes are dropped
        let options = SnrOptions {
            exclude_negative_lobes: true,
        };
        assert!(snr(&frame.view(), (26.0, 20.0), 8.0, &SnrOptions::default()).is_ok());
        assert!(matches!(
            snr(&frame.view(), (26.0, 20.0), 8.0, &options),
            Err(SnrError::TooFewApertures { found: 1 })
        ));
    }

    #[test]
    fn test_empty_frame_has_zero_noise() {
        let frame = Array2::<f64>::zeros((41, 41));
        assert!(matches!(
            snr(&frame.view(), (35.0, 20.0), 4.0, &SnrOptions::default()),
            Err(SnrError::ZeroNoise)
        ));
    }

    #[test]
    fn test_snr_map_peaks_on_source() {
        let mut frame = noise_frame(41);
        add_blob(&mut frame, 32.0, 20.0, 20.0);
        let map = snr_map(&frame.view(), 4.0);
        assert_eq!(map.dim(), (41, 41));
        assert_eq!(map[[20, 20]], 0.0);
        assert!(map[[20, 32]] > 5.0);
    }
}
