//! Full-frame vs. annular PCA detectability study
//!
//! Sweeps the number of principal components of both reductions and reports
//! the S/N of companions in the residual frames.
//!
//! # Usage
//!
//! ```bash
//! # S/N of the known companion against ncomp (snrs.png)
//! cargo run --release --bin pca_snr_study -- detection
//!
//! # Remove the companion, inject fakes, compare per-ncomp residuals
//! # (fullvsannu_<ncomp>.png and experiments.png)
//! cargo run --release --bin pca_snr_study -- injection --ncomps 10:60:10
//!
//! # Both, as SVG, with residual FITS files and a custom scenario
//! cargo run --release --bin pca_snr_study -- all --format svg --save-fits \
//!     --scenario scenario.json --output-dir out
//! ```
//!
//! Every run writes `report.json` with the measured S/N values to the output
//! directory. Set `RUST_LOG=debug` to log each ncomp step.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use pca_experiments::plots::{
    figure_path, save_figure, Figure, ResidualComparisonFigure, SnrCurveFigure, SourceSnrFigure,
};
use pca_experiments::report::{save_residuals, StudyReport};
use pca_experiments::sweep::{detection_sweep_with, injection_sweep};
use pca_experiments::{Dataset, PlotFormat, Scenario, StudyArgs};
use std::path::Path;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// S/N of the real companion against ncomp
    Detection {
        #[command(flatten)]
        args: StudyArgs,
    },
    /// S/N of injected companions in the planet-free cube against ncomp
    Injection {
        #[command(flatten)]
        args: StudyArgs,
    },
    /// Run both sweeps
    All {
        #[command(flatten)]
        args: StudyArgs,
    },
}

fn render<F: Figure>(figure: &F, dir: &Path, stem: &str, format: PlotFormat) -> Result<()> {
    let path = figure_path(dir, stem, format);
    save_figure(figure, &path, format).map_err(|e| anyhow!("rendering {}: {e}", path.display()))
}

fn load_scenario(args: &StudyArgs) -> Result<Scenario> {
    let mut scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::default(),
    };
    if let Some(ncomps) = &args.ncomps {
        println!("Overriding ncomp values with {ncomps}");
        scenario = scenario.with_ncomps(&ncomps.0);
    }
    scenario.validate()?;
    Ok(scenario)
}

fn run_detection(dataset: &Dataset, scenario: &Scenario, args: &StudyArgs, report: &mut StudyReport) -> Result<()> {
    let fits_dir = args.output_dir.join("detection");
    let sweep = detection_sweep_with(dataset, scenario, |ncomp, full, annular| {
        if args.save_fits {
            save_residuals(&fits_dir, ncomp, full, annular)?;
        }
        Ok(())
    })?;

    render(
        &SnrCurveFigure {
            ncomps: &sweep.ncomps,
            full_frame: &sweep.full_frame,
            annular: &sweep.annular,
        },
        &args.output_dir,
        "snrs",
        args.format,
    )?;

    println!("\nDetection sweep at ({:.1}, {:.1}):", sweep.target_xy.0, sweep.target_xy.1);
    println!("{:>6} {:>12} {:>12}", "ncomp", "full-frame", "annular");
    for ((ncomp, full), annular) in sweep.ncomps.iter().zip(&sweep.full_frame).zip(&sweep.annular) {
        println!("{ncomp:>6} {:>12} {:>12}", format_snr(*full), format_snr(*annular));
    }

    report.detection = Some(sweep);
    Ok(())
}

fn run_injection(dataset: &Dataset, scenario: &Scenario, args: &StudyArgs, report: &mut StudyReport) -> Result<()> {
    let fits_dir = args.output_dir.join("injection");
    let sweep = injection_sweep(dataset, scenario, |ncomp, full, annular| {
        render(
            &ResidualComparisonFigure {
                ncomp,
                full_frame: full,
                annular,
            },
            &args.output_dir,
            &format!("fullvsannu_{ncomp}"),
            args.format,
        )?;
        if args.save_fits {
            save_residuals(&fits_dir, ncomp, full, annular)?;
        }
        Ok(())
    })?;

    render(
        &SourceSnrFigure {
            ncomps: &sweep.ncomps,
            sources: &sweep.sources,
        },
        &args.output_dir,
        "experiments",
        args.format,
    )?;

    for source in &sweep.sources {
        println!("\n{} at ({:.1}, {:.1}):", source.label, source.x, source.y);
        println!("{:>6} {:>12} {:>12}", "ncomp", "full-frame", "annular");
        for ((ncomp, full), annular) in sweep.ncomps.iter().zip(&source.full_frame).zip(&source.annular) {
            println!("{ncomp:>6} {:>12} {:>12}", format_snr(*full), format_snr(*annular));
        }
    }

    report.injection = Some(sweep);
    Ok(())
}

fn format_snr(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => "-".to_string(),
    }
}

fn run(args: &StudyArgs, detection: bool, injection: bool) -> Result<()> {
    let scenario = load_scenario(args)?;
    let dataset = Dataset::load(&args.prefix)?;
    println!(
        "Loaded {}: {} frames of {:?}, FWHM {:.2} px",
        dataset.name,
        dataset.frames(),
        &dataset.cube.shape()[1..],
        dataset.fwhm
    );

    let mut report = StudyReport::new(&dataset);
    if detection {
        run_detection(&dataset, &scenario, args, &mut report)?;
    }
    if injection {
        run_injection(&dataset, &scenario, args, &mut report)?;
    }

    let path = report.save(&args.output_dir)?;
    println!("\nReport written to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Detection { args } => run(args, true, false),
        Commands::Injection { args } => run(args, false, true),
        Commands::All { args } => run(args, true, true),
    }
}
