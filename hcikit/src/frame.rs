//! Frame geometry and resampling.
//!
//! Pixel coordinates are `(x, y)` = (column, row) of the array as stored, and
//! position angles are measured counter-clockwise from +x toward +y in that
//! frame. The center of an `n`-pixel axis is `n / 2` for even `n` and
//! `(n - 1) / 2` for odd `n`, so it always falls on a pixel.

use crate::stats::median_in_place;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// Errors from frame and cube manipulation.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("crop size {size} exceeds frame dimensions {ny}x{nx}")]
    CropTooLarge { size: usize, ny: usize, nx: usize },
    #[error("crop size must be positive")]
    EmptyCrop,
    #[error("{angles} angles given for a cube of {frames} frames")]
    AngleCountMismatch { frames: usize, angles: usize },
    #[error("cannot collapse an empty cube")]
    EmptyCube,
}

/// How a cube is reduced to a single frame along the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collapse {
    #[default]
    Median,
    Mean,
    Sum,
}

/// Center `(cy, cx)` of a frame with shape `(ny, nx)`.
pub fn frame_center(shape: (usize, usize)) -> (f64, f64) {
    let (ny, nx) = shape;
    ((ny / 2) as f64, (nx / 2) as f64)
}

/// Euclidean distance between `(y0, x0)` and `(y1, x1)`.
pub fn dist(y0: f64, x0: f64, y1: f64, x1: f64) -> f64 {
    (y1 - y0).hypot(x1 - x0)
}

/// Offset `(dy, dx)` of a point at radius `r` and position angle `theta_deg`.
pub fn polar_offset(r: f64, theta_deg: f64) -> (f64, f64) {
    let (sin, cos) = theta_deg.to_radians().sin_cos();
    (r * sin, r * cos)
}

/// Crop a centered `size x size` box out of `frame`.
///
/// The crop center lands on the crop's own center pixel, so odd crops of
/// even frames drop the first row and column.
pub fn frame_crop(frame: &ArrayView2<f64>, size: usize) -> Result<Array2<f64>, FrameError> {
    let (ny, nx) = frame.dim();
    if size == 0 {
        return Err(FrameError::EmptyCrop);
    }
    if size > ny || size > nx {
        return Err(FrameError::CropTooLarge { size, ny, nx });
    }
    let y0 = ny / 2 - size / 2;
    let x0 = nx / 2 - size / 2;
    Ok(frame
        .slice(ndarray::s![y0..y0 + size, x0..x0 + size])
        .to_owned())
}

/// Bilinear sample at fractional `(y, x)`. Outside the frame returns 0.
fn bilinear(frame: &ArrayView2<f64>, y: f64, x: f64) -> f64 {
    const EDGE_TOLERANCE: f64 = 1e-9;
    let (ny, nx) = frame.dim();
    let max_y = (ny - 1) as f64;
    let max_x = (nx - 1) as f64;

    if y < -EDGE_TOLERANCE
        || x < -EDGE_TOLERANCE
        || y > max_y + EDGE_TOLERANCE
        || x > max_x + EDGE_TOLERANCE
    {
        return 0.0;
    }
    let y = y.clamp(0.0, max_y);
    let x = x.clamp(0.0, max_x);

    let y0 = y.floor() as usize;
    let x0 = x.floor() as usize;
    let y1 = (y0 + 1).min(ny - 1);
    let x1 = (x0 + 1).min(nx - 1);
    let fy = y - y0 as f64;
    let fx = x - x0 as f64;

    let top = frame[[y0, x0]] * (1.0 - fx) + frame[[y0, x1]] * fx;
    let bottom = frame[[y1, x0]] * (1.0 - fx) + frame[[y1, x1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Rotate `frame` about its center so that content at position angle `phi`
/// ends up at `phi + angle_deg`.
pub fn frame_rotate(frame: &ArrayView2<f64>, angle_deg: f64) -> Array2<f64> {
    let (ny, nx) = frame.dim();
    if ny == 0 || nx == 0 {
        return Array2::zeros((ny, nx));
    }
    let (cy, cx) = frame_center((ny, nx));
    let (sin, cos) = angle_deg.to_radians().sin_cos();

    Array2::from_shape_fn((ny, nx), |(y, x)| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        // Inverse mapping: rotate the destination back by -angle
        let sx = cos * dx + sin * dy + cx;
        let sy = -sin * dx + cos * dy + cy;
        bilinear(frame, sy, sx)
    })
}

/// De-rotate every frame of a cube by its parallactic angle.
///
/// A source at position angle `theta - angles[i]` in frame `i` lands at
/// `theta` in the output, aligning the sky across frames.
pub fn cube_derotate(cube: &ArrayView3<f64>, angles: &[f64]) -> Result<Array3<f64>, FrameError> {
    let frames = cube.len_of(Axis(0));
    if frames != angles.len() {
        return Err(FrameError::AngleCountMismatch {
            frames,
            angles: angles.len(),
        });
    }

    let rotated: Vec<Array2<f64>> = (0..frames)
        .into_par_iter()
        .map(|i| frame_rotate(&cube.index_axis(Axis(0), i), angles[i]))
        .collect();

    let mut out = Array3::zeros(cube.dim());
    for (i, frame) in rotated.into_iter().enumerate() {
        out.index_axis_mut(Axis(0), i).assign(&frame);
    }
    Ok(out)
}

/// Collapse a cube along the frame axis.
pub fn cube_collapse(cube: &ArrayView3<f64>, collapse: Collapse) -> Result<Array2<f64>, FrameError> {
    if cube.len_of(Axis(0)) == 0 {
        return Err(FrameError::EmptyCube);
    }
    let frame = match collapse {
        Collapse::Median => cube.map_axis(Axis(0), |lane| {
            let mut values = lane.to_vec();
            median_in_place(&mut values)
        }),
        Collapse::Mean => cube.mean_axis(Axis(0)).ok_or(FrameError::EmptyCube)?,
        Collapse::Sum => cube.sum_axis(Axis(0)),
    };
    Ok(frame)
}

/// Zero every pixel closer than `radius` to the frame center.
pub fn mask_circle(frame: &mut Array2<f64>, radius: f64) {
    let (cy, cx) = frame_center(frame.dim());
    for ((y, x), value) in frame.indexed_iter_mut() {
        if dist(cy, cx, y as f64, x as f64) < radius {
            *value = 0.0;
        }
    }
}

/// Pixels `(y, x)` with `inner <= r < inner + width` from the frame center.
pub fn annulus_indices(shape: (usize, usize), inner: f64, width: f64) -> Vec<(usize, usize)> {
    let (ny, nx) = shape;
    let (cy, cx) = frame_center(shape);
    let outer = inner + width;
    let mut indices = Vec::new();
    for y in 0..ny {
        for x in 0..nx {
            let r = dist(cy, cx, y as f64, x as f64);
            if r >= inner && r < outer {
                indices.push((y, x));
            }
        }
    }
    indices
}

fn fft_along(data: &mut Array2<Complex64>, axis: Axis, inverse: bool) {
    let n = data.len_of(axis);
    if n == 0 {
        return;
    }
    let mut planner = FftPlanner::<f64>::new();
    let fft = if inverse {
        planner.plan_fft_inverse(n)
    } else {
        planner.plan_fft_forward(n)
    };

    let mut buffer = vec![Complex64::new(0.0, 0.0); n];
    for mut lane in data.lanes_mut(axis) {
        for (b, v) in buffer.iter_mut().zip(lane.iter()) {
            *b = *v;
        }
        fft.process(&mut buffer);
        for (v, b) in lane.iter_mut().zip(buffer.iter()) {
            *v = *b;
        }
    }
}

/// 2-D discrete Fourier transform of a real frame.
pub(crate) fn fft2(frame: &ArrayView2<f64>) -> Array2<Complex64> {
    let mut spectrum = frame.mapv(|v| Complex64::new(v, 0.0));
    fft_along(&mut spectrum, Axis(1), false);
    fft_along(&mut spectrum, Axis(0), false);
    spectrum
}

/// Signed sample frequency of bin `k` in an `n`-point transform (cycles per pixel).
fn sample_frequency(k: usize, n: usize) -> f64 {
    let signed = if k < (n + 1) / 2 {
        k as f64
    } else {
        k as f64 - n as f64
    };
    signed / n as f64
}

/// Apply a `(dy, dx)` shift to a spectrum and return the real inverse transform.
pub(crate) fn shift_spectrum(spectrum: &Array2<Complex64>, dy: f64, dx: f64) -> Array2<f64> {
    let (ny, nx) = spectrum.dim();
    let mut shifted = spectrum.clone();
    for ((v, u), value) in shifted.indexed_iter_mut() {
        let phase = -2.0 * PI * (sample_frequency(v, ny) * dy + sample_frequency(u, nx) * dx);
        *value *= Complex64::from_polar(1.0, phase);
    }
    fft_along(&mut shifted, Axis(0), true);
    fft_along(&mut shifted, Axis(1), true);

    let norm = (ny * nx) as f64;
    shifted.mapv(|c| c.re / norm)
}

/// Sub-pixel shift by `(dy, dx)` using the Fourier shift theorem.
///
/// The shift is circular; integer shifts reproduce a roll of the array.
pub fn frame_shift(frame: &ArrayView2<f64>, dy: f64, dx: f64) -> Array2<f64> {
    shift_spectrum(&fft2(frame), dy, dx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn gaussian_frame(ny: usize, nx: usize, y0: f64, x0: f64, sigma: f64) -> Array2<f64> {
        Array2::from_shape_fn((ny, nx), |(y, x)| {
            let r2 = (y as f64 - y0).powi(2) + (x as f64 - x0).powi(2);
            (-r2 / (2.0 * sigma * sigma)).exp()
        })
    }

    fn argmax(frame: &Array2<f64>) -> (usize, usize) {
        let mut best = (0, 0);
        let mut best_value = f64::NEG_INFINITY;
        for ((y, x), &v) in frame.indexed_iter() {
            if v > best_value {
                best_value = v;
                best = (y, x);
            }
        }
        best
    }

    #[test]
    fn test_frame_center_even_and_odd() {
        assert_eq!(frame_center((100, 100)), (50.0, 50.0));
        assert_eq!(frame_center((101, 99)), (50.0, 49.0));
        assert_eq!(frame_center((1, 2)), (0.0, 1.0));
    }

    #[test]
    fn test_polar_offset_quadrants() {
        let (dy, dx) = polar_offset(10.0, 90.0);
        assert_relative_eq!(dy, 10.0, epsilon = 1e-12);
        assert_relative_eq!(dx, 0.0, epsilon = 1e-12);

        let (dy, dx) = polar_offset(2.0, 180.0);
        assert_relative_eq!(dy, 0.0, epsilon = 1e-12);
        assert_relative_eq!(dx, -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_frame_crop_keeps_center_pixel() {
        let mut frame = Array2::<f64>::zeros((100, 100));
        frame[[50, 50]] = 1.0;
        let cropped = frame_crop(&frame.view(), 21).unwrap();
        assert_eq!(cropped.dim(), (21, 21));
        assert_eq!(cropped[[10, 10]], 1.0);

        let odd = frame_crop(&frame.view(), 99).unwrap();
        assert_eq!(odd[[49, 49]], 1.0);
    }

    #[test]
    fn test_frame_crop_rejects_oversize() {
        let frame = Array2::<f64>::zeros((10, 12));
        assert!(matches!(
            frame_crop(&frame.view(), 11),
            Err(FrameError::CropTooLarge { .. })
        ));
        assert!(matches!(
            frame_crop(&frame.view(), 0),
            Err(FrameError::EmptyCrop)
        ));
    }

    #[test]
    fn test_integer_fourier_shift_is_a_roll() {
        let frame = gaussian_frame(32, 40, 12.0, 15.0, 2.0);
        let shifted = frame_shift(&frame.view(), 3.0, -5.0);
        for y in 0..32 {
            for x in 0..40 {
                let src_y = (y + 32 - 3) % 32;
                let src_x = (x + 5) % 40;
                assert_relative_eq!(shifted[[y, x]], frame[[src_y, src_x]], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_subpixel_fourier_shift_moves_centroid() {
        let frame = gaussian_frame(64, 64, 32.0, 32.0, 2.5);
        let shifted = frame_shift(&frame.view(), 0.5, 1.25);

        let total: f64 = shifted.sum();
        let (mut my, mut mx) = (0.0, 0.0);
        for ((y, x), &v) in shifted.indexed_iter() {
            my += y as f64 * v;
            mx += x as f64 * v;
        }
        assert_relative_eq!(my / total, 32.5, epsilon = 1e-6);
        assert_relative_eq!(mx / total, 33.25, epsilon = 1e-6);
    }

    #[test]
    fn test_rotation_moves_source_counter_clockwise() {
        // Source at theta = 0 (pure +x) should move to theta = 90 (pure +y)
        let frame = gaussian_frame(41, 41, 20.0, 30.0, 1.5);
        let rotated = frame_rotate(&frame.view(), 90.0);
        assert_eq!(argmax(&rotated), (30, 20));
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let frame = gaussian_frame(21, 25, 7.3, 11.8, 2.0);
        let rotated = frame_rotate(&frame.view(), 0.0);
        for (a, b) in rotated.iter().zip(frame.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_cube_derotate_aligns_rotating_source() {
        let angles = [0.0, 30.0, 60.0];
        let theta: f64 = 45.0;
        let mut cube = Array3::<f64>::zeros((3, 51, 51));
        for (i, &angle) in angles.iter().enumerate() {
            let (dy, dx) = polar_offset(15.0, theta - angle);
            let frame = gaussian_frame(51, 51, 25.0 + dy, 25.0 + dx, 1.5);
            cube.index_axis_mut(Axis(0), i).assign(&frame);
        }

        let derotated = cube_derotate(&cube.view(), &angles).unwrap();
        let (dy, dx) = polar_offset(15.0, theta);
        let expected = ((25.0 + dy).round() as usize, (25.0 + dx).round() as usize);
        for i in 0..3 {
            let frame = derotated.index_axis(Axis(0), i).to_owned();
            assert_eq!(argmax(&frame), expected, "frame {i}");
        }
    }

    #[test]
    fn test_cube_derotate_rejects_mismatched_angles() {
        let cube = Array3::<f64>::zeros((3, 5, 5));
        assert!(matches!(
            cube_derotate(&cube.view(), &[0.0, 1.0]),
            Err(FrameError::AngleCountMismatch {
                frames: 3,
                angles: 2
            })
        ));
    }

    #[test]
    fn test_cube_collapse_modes() {
        let mut cube = Array3::<f64>::zeros((3, 2, 2));
        cube.index_axis_mut(Axis(0), 0).fill(1.0);
        cube.index_axis_mut(Axis(0), 1).fill(2.0);
        cube.index_axis_mut(Axis(0), 2).fill(9.0);

        let median = cube_collapse(&cube.view(), Collapse::Median).unwrap();
        let mean = cube_collapse(&cube.view(), Collapse::Mean).unwrap();
        let sum = cube_collapse(&cube.view(), Collapse::Sum).unwrap();
        assert_eq!(median[[0, 0]], 2.0);
        assert_relative_eq!(mean[[1, 1]], 4.0);
        assert_eq!(sum[[0, 1]], 12.0);
    }

    #[test]
    fn test_mask_circle_and_annulus() {
        let mut frame = Array2::<f64>::ones((21, 21));
        mask_circle(&mut frame, 3.0);
        assert_eq!(frame[[10, 10]], 0.0);
        assert_eq!(frame[[10, 12]], 0.0);
        assert_eq!(frame[[10, 13]], 1.0);

        let ring = annulus_indices((21, 21), 4.0, 2.0);
        assert!(ring.contains(&(10, 14)));
        assert!(ring.contains(&(10, 15)));
        assert!(!ring.contains(&(10, 16)));
        assert!(!ring.contains(&(10, 10)));
    }
}
