//! JSON summary of a study run and FITS export of residual frames.

use crate::dataset::Dataset;
use crate::sweep::{DetectionSweep, InjectionSweep};
use anyhow::{Context, Result};
use hcikit::io::write_fits_frame;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "report.json";

/// Everything a study run measured, saved as `report.json`.
///
/// Sweeps that were not run are left out of the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyReport {
    pub dataset: String,
    pub fwhm: f64,
    pub psf_flux: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionSweep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub injection: Option<InjectionSweep>,
}

impl StudyReport {
    pub fn new(dataset: &Dataset) -> Self {
        Self {
            dataset: dataset.name.clone(),
            fwhm: dataset.fwhm,
            psf_flux: dataset.psf_flux,
            detection: None,
            injection: None,
        }
    }

    /// Write `report.json` into `dir` and return its path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(REPORT_FILE);
        let text = serde_json::to_string_pretty(self)?;
        fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Write both residual frames of one ncomp step as
/// `residuals_full_{ncomp}.fits` and `residuals_annular_{ncomp}.fits`.
pub fn save_residuals(dir: &Path, ncomp: usize, full_frame: &Array2<f64>, annular: &Array2<f64>) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for (kind, frame) in [("full", full_frame), ("annular", annular)] {
        let path = dir.join(format!("residuals_{kind}_{ncomp}.fits"));
        write_fits_frame(&frame.view(), &path).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::SourceSeries;
    use hcikit::io::open_fits_frame;
    use tempfile::tempdir;

    fn report() -> StudyReport {
        StudyReport {
            dataset: "datasets/naco_betapic_".to_string(),
            fwhm: 4.8,
            psf_flux: 764.0,
            detection: Some(DetectionSweep {
                ncomps: vec![1, 3],
                target_xy: (58.5, 35.5),
                full_frame: vec![Some(4.2), None],
                annular: vec![Some(6.1), Some(7.0)],
            }),
            injection: Some(InjectionSweep {
                ncomps: vec![10],
                sources: vec![SourceSeries {
                    label: "far-dim".to_string(),
                    x: 18.2,
                    y: 18.2,
                    full_frame: vec![Some(3.0)],
                    annular: vec![None],
                }],
            }),
        }
    }

    #[test]
    fn test_report_round_trip() {
        let dir = tempdir().unwrap();
        let original = report();
        let path = original.save(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), REPORT_FILE);
        assert_eq!(StudyReport::load(&path).unwrap(), original);
    }

    #[test]
    fn test_missing_sweeps_are_omitted() {
        let mut partial = report();
        partial.injection = None;
        let json = serde_json::to_string(&partial).unwrap();
        assert!(!json.contains("injection"));
        assert!(json.contains("null"));

        let back: StudyReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.injection, None);
    }

    #[test]
    fn test_save_residuals_writes_both_frames() {
        let dir = tempdir().unwrap();
        let full = Array2::from_shape_fn((8, 10), |(y, x)| (y * 10 + x) as f64);
        let annular = -&full;
        save_residuals(dir.path(), 7, &full, &annular).unwrap();

        let read_full = open_fits_frame(dir.path().join("residuals_full_7.fits")).unwrap();
        let read_annular = open_fits_frame(dir.path().join("residuals_annular_7.fits")).unwrap();
        assert_eq!(read_full, full);
        assert_eq!(read_annular, annular);
    }
}
