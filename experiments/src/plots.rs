//! Figures of the study, drawn with plotters on PNG or SVG backends.

use crate::args::PlotFormat;
use crate::sweep::{SnrSeries, SourceSeries};
use ndarray::Array2;
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

pub type PlotResult<T> = Result<T, Box<dyn Error>>;

const FULL_FRAME_LABEL: &str = "full-frame";
const ANNULAR_LABEL: &str = "annular";
const COLOUR_BAR_WIDTH: u32 = 90;
const COLOUR_BAR_STEPS: usize = 128;

/// Something that can be drawn onto any plotters backend.
pub trait Figure {
    /// Size in pixels.
    fn size(&self) -> (u32, u32);

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> PlotResult<()>
    where
        DB::ErrorType: 'static;
}

/// Render `figure` to `path`, creating parent directories.
pub fn save_figure<F: Figure>(figure: &F, path: &Path, format: PlotFormat) -> PlotResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    match format {
        PlotFormat::Png => {
            let root = BitMapBackend::new(path, figure.size()).into_drawing_area();
            root.fill(&WHITE)?;
            figure.draw(&root)?;
            root.present()?;
        }
        PlotFormat::Svg => {
            let root = SVGBackend::new(path, figure.size()).into_drawing_area();
            root.fill(&WHITE)?;
            figure.draw(&root)?;
            root.present()?;
        }
    }
    log::info!("figure saved to {}", path.display());
    Ok(())
}

/// `{dir}/{stem}.{ext}`
pub fn figure_path(dir: &Path, stem: &str, format: PlotFormat) -> PathBuf {
    dir.join(format!("{stem}.{}", format.extension()))
}

/// Smallest and largest finite value, if any.
pub fn value_range<I: IntoIterator<Item = f64>>(values: I) -> Option<(f64, f64)> {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Widen `(lo, hi)` by `fraction` of its span on both sides; a degenerate
/// range becomes `lo - 1 .. hi + 1`.
pub fn padded(range: (f64, f64), fraction: f64) -> (f64, f64) {
    let (lo, hi) = range;
    let span = hi - lo;
    if span > 0.0 {
        (lo - fraction * span, hi + fraction * span)
    } else {
        (lo - 1.0, hi + 1.0)
    }
}

/// `(ncomp, snr)` pairs with missing measurements dropped.
pub fn present_points(ncomps: &[usize], series: &SnrSeries) -> Vec<(f64, f64)> {
    ncomps
        .iter()
        .zip(series)
        .filter_map(|(&n, s)| s.map(|v| (n as f64, v)))
        .filter(|(_, v)| v.is_finite())
        .collect()
}

/// Viridis colour of `value` within `(lo, hi)`.
pub fn viridis(value: f64, (lo, hi): (f64, f64)) -> RGBColor {
    let t = if hi > lo {
        ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
    } else {
        0.5
    };
    let c = colorous::VIRIDIS.eval_continuous(t);
    RGBColor(c.r, c.g, c.b)
}

fn series_colour(index: usize) -> RGBColor {
    let c = colorous::TABLEAU10[index % colorous::TABLEAU10.len()];
    RGBColor(c.r, c.g, c.b)
}

fn axis_ranges(ncomps: &[usize], series: &[&SnrSeries]) -> ((f64, f64), (f64, f64)) {
    let x = value_range(ncomps.iter().map(|&n| n as f64)).unwrap_or((0.0, 1.0));
    let y = value_range(series.iter().flat_map(|s| s.iter().flatten().copied())).unwrap_or((0.0, 1.0));
    (padded(x, 0.05), padded(y, 0.1))
}

fn draw_snr_series<DB: DrawingBackend>(
    chart: &mut ChartContext<DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>,
    points: Vec<(f64, f64)>,
    colour: RGBColor,
    label: &str,
) -> PlotResult<()>
where
    DB::ErrorType: 'static,
{
    let style = colour.mix(0.5);
    chart
        .draw_series(LineSeries::new(points.iter().copied(), style.stroke_width(2)))?
        .label(label)
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], colour));
    chart.draw_series(points.into_iter().map(|p| Circle::new(p, 4, style.filled())))?;
    Ok(())
}

/// One panel of S/N against ncomp for both reductions.
fn draw_snr_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    title: &str,
    x_desc: &str,
    y_desc: &str,
    ncomps: &[usize],
    full_frame: &SnrSeries,
    annular: &SnrSeries,
) -> PlotResult<()>
where
    DB::ErrorType: 'static,
{
    let ((x0, x1), (y0, y1)) = axis_ranges(ncomps, &[full_frame, annular]);
    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 25))
        .margin(5)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(x0..x1, y0..y1)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc(y_desc)
        .x_label_formatter(&|x| format!("{x:.0}"))
        .y_label_formatter(&|y| format!("{y:.1}"))
        .draw()?;

    draw_snr_series(&mut chart, present_points(ncomps, full_frame), series_colour(0), FULL_FRAME_LABEL)?;
    draw_snr_series(&mut chart, present_points(ncomps, annular), series_colour(1), ANNULAR_LABEL)?;

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

/// S/N of the real companion against ncomp.
pub struct SnrCurveFigure<'a> {
    pub ncomps: &'a [usize],
    pub full_frame: &'a SnrSeries,
    pub annular: &'a SnrSeries,
}

impl Figure for SnrCurveFigure<'_> {
    fn size(&self) -> (u32, u32) {
        (1000, 500)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> PlotResult<()>
    where
        DB::ErrorType: 'static,
    {
        draw_snr_panel(
            root,
            "PCA type vs. SNR",
            "Principal components",
            "S/N ratio",
            self.ncomps,
            self.full_frame,
            self.annular,
        )
    }
}

/// Full-frame and annular residual frames of one ncomp, stacked.
pub struct ResidualComparisonFigure<'a> {
    pub ncomp: usize,
    pub full_frame: &'a Array2<f64>,
    pub annular: &'a Array2<f64>,
}

/// Heat map with the first row at the bottom, plus a colour bar.
fn draw_heat_map<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    title: &str,
    frame: &Array2<f64>,
) -> PlotResult<()>
where
    DB::ErrorType: 'static,
{
    let (ny, nx) = frame.dim();
    let range = value_range(frame.iter().copied()).unwrap_or((0.0, 1.0));
    let (width, _) = area.dim_in_pixel();
    let (map_area, bar_area) = area.split_horizontally(width.saturating_sub(COLOUR_BAR_WIDTH));

    let mut chart = ChartBuilder::on(&map_area)
        .caption(title, ("sans-serif", 25))
        .margin(5)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0.0..nx as f64, 0.0..ny as f64)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_label_formatter(&|x| format!("{x:.0}"))
        .y_label_formatter(&|y| format!("{y:.0}"))
        .draw()?;
    chart.draw_series(frame.indexed_iter().map(|((y, x), &v)| {
        let (x, y) = (x as f64, y as f64);
        Rectangle::new([(x, y), (x + 1.0, y + 1.0)], viridis(v, range).filled())
    }))?;

    let (lo, hi) = padded(range, 0.0);
    let step = (hi - lo) / COLOUR_BAR_STEPS as f64;
    let mut bar = ChartBuilder::on(&bar_area)
        .margin_top(40)
        .margin_bottom(35)
        .margin_right(5)
        .y_label_area_size(55)
        .build_cartesian_2d(0.0..1.0, lo..hi)?;
    bar.configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .y_label_style(("sans-serif", 14))
        .y_label_formatter(&|v| format!("{v:.2}"))
        .draw()?;
    bar.draw_series((0..COLOUR_BAR_STEPS).map(|k| {
        let v0 = lo + k as f64 * step;
        Rectangle::new([(0.0, v0), (1.0, v0 + step)], viridis(v0 + step / 2.0, (lo, hi)).filled())
    }))?;
    Ok(())
}

impl Figure for ResidualComparisonFigure<'_> {
    fn size(&self) -> (u32, u32) {
        (800, 1400)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> PlotResult<()>
    where
        DB::ErrorType: 'static,
    {
        let root = root.titled(&format!("ncomp: {}", self.ncomp), ("sans-serif", 40))?;
        let panels = root.split_evenly((2, 1));
        draw_heat_map(&panels[0], "PCA full-frame", self.full_frame)?;
        draw_heat_map(&panels[1], "PCA annular", self.annular)?;
        Ok(())
    }
}

/// One panel per injected source, S/N against ncomp.
pub struct SourceSnrFigure<'a> {
    pub ncomps: &'a [usize],
    pub sources: &'a [SourceSeries],
}

impl Figure for SourceSnrFigure<'_> {
    fn size(&self) -> (u32, u32) {
        (500, 270 * self.sources.len().max(1) as u32)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> PlotResult<()>
    where
        DB::ErrorType: 'static,
    {
        if self.sources.is_empty() {
            return Ok(());
        }
        let panels = root.split_evenly((self.sources.len(), 1));
        for (panel, source) in panels.iter().zip(self.sources) {
            draw_snr_panel(
                panel,
                &source.label,
                "ncomp",
                "SNR",
                self.ncomps,
                &source.full_frame,
                &source.annular,
            )?;
        }
        Ok(())
    }
}
