//! Command-line argument types shared by the study binaries.

use clap::{Args, ValueEnum};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Parse an ncomp list: either comma separated ("10,20,30") or an inclusive
/// range "start:stop:step" ("1:49:2").
fn parse_ncomps(s: &str) -> Result<Vec<usize>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("ncomp list cannot be empty".to_string());
    }

    let values = if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err("Range must be in format 'start:stop:step'".to_string());
        }
        let parse = |part: &str, what: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| format!("Invalid {what} value: {part}"))
        };
        let start = parse(parts[0], "start")?;
        let stop = parse(parts[1], "stop")?;
        let step = parse(parts[2], "step")?;
        if step == 0 {
            return Err("Step cannot be zero".to_string());
        }
        if start > stop {
            return Err("Start must not exceed stop".to_string());
        }
        (start..=stop).step_by(step).collect()
    } else {
        s.split(',')
            .map(|part| {
                part.trim()
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid ncomp value: {part}"))
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    if values.contains(&0) {
        return Err("ncomp must be at least 1".to_string());
    }
    Ok(values)
}

/// List of principal component counts to sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NcompList(pub Vec<usize>);

impl FromStr for NcompList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_ncomps(s).map(NcompList)
    }
}

impl fmt::Display for NcompList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Output format for figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PlotFormat {
    #[default]
    Png,
    Svg,
}

impl PlotFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            PlotFormat::Png => "png",
            PlotFormat::Svg => "svg",
        }
    }
}

impl fmt::Display for PlotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Arguments common to every study subcommand.
#[derive(Debug, Clone, Args)]
pub struct StudyArgs {
    /// Dataset prefix; `cube_cen`, `psf` and `derot_angles` are appended
    #[arg(long, default_value = "datasets/naco_betapic_")]
    pub prefix: String,

    /// Directory for figures, the JSON report and FITS residuals
    #[arg(long, default_value = "images")]
    pub output_dir: PathBuf,

    /// Figure format
    #[arg(long, value_enum, default_value_t = PlotFormat::Png)]
    pub format: PlotFormat,

    /// Scenario JSON file (defaults reproduce the Beta Pic analysis)
    #[arg(long)]
    pub scenario: Option<PathBuf>,

    /// Override the ncomp values of the sweep(s), e.g. "10,20,30" or "1:49:2"
    #[arg(long)]
    pub ncomps: Option<NcompList>,

    /// Also write every residual frame as FITS
    #[arg(long)]
    pub save_fits: bool,
}
