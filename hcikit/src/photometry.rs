//! Circular aperture photometry with fractional pixel coverage.

use ndarray::ArrayView2;

/// Sub-samples per axis for pixels straddling the aperture edge.
const EDGE_SUBSAMPLES: usize = 10;

/// Fraction of the unit pixel centred on `(px, py)` that lies inside the circle.
fn pixel_coverage(px: f64, py: f64, x: f64, y: f64, radius: f64) -> f64 {
    let dx = (px - x).abs();
    let dy = (py - y).abs();

    let far = (dx + 0.5).hypot(dy + 0.5);
    if far <= radius {
        return 1.0;
    }
    let near = (dx - 0.5).max(0.0).hypot((dy - 0.5).max(0.0));
    if near >= radius {
        return 0.0;
    }

    let step = 1.0 / EDGE_SUBSAMPLES as f64;
    let r2 = radius * radius;
    let mut inside = 0usize;
    for i in 0..EDGE_SUBSAMPLES {
        let sy = py - 0.5 + (i as f64 + 0.5) * step;
        for j in 0..EDGE_SUBSAMPLES {
            let sx = px - 0.5 + (j as f64 + 0.5) * step;
            if (sx - x).powi(2) + (sy - y).powi(2) <= r2 {
                inside += 1;
            }
        }
    }
    inside as f64 / (EDGE_SUBSAMPLES * EDGE_SUBSAMPLES) as f64
}

/// Sum of `frame` inside a circle of `radius` pixels centred on `(x, y)`.
///
/// `x` is the column and `y` the row. Parts of the aperture outside the
/// frame contribute nothing.
pub fn aperture_sum(frame: &ArrayView2<f64>, x: f64, y: f64, radius: f64) -> f64 {
    let (ny, nx) = frame.dim();
    if radius <= 0.0 || ny == 0 || nx == 0 {
        return 0.0;
    }

    let y_min = (y - radius - 1.0).floor().max(0.0) as usize;
    let x_min = (x - radius - 1.0).floor().max(0.0) as usize;
    let y_max = ((y + radius + 1.0).ceil().max(0.0) as usize).min(ny - 1);
    let x_max = ((x + radius + 1.0).ceil().max(0.0) as usize).min(nx - 1);
    if y_min > y_max || x_min > x_max {
        return 0.0;
    }

    let mut total = 0.0;
    for py in y_min..=y_max {
        for px in x_min..=x_max {
            let weight = pixel_coverage(px as f64, py as f64, x, y, radius);
            if weight > 0.0 {
                total += weight * frame[[py, px]];
            }
        }
    }
    total
}
