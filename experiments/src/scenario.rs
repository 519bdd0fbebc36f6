//! Study configuration, loadable from JSON.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! reproduces the Beta Pictoris NACO analysis: a detection sweep on the real
//! companion, then three injected companions in the planet-free cube.

use anyhow::{bail, Context, Result};
use hcikit::{AnnularOptions, Instrument, KnownCompanion, PcaOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// ncomp sweep on the data as observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSweepConfig {
    pub ncomps: Vec<usize>,
    /// `(x, y)` of the companion in the final frame.
    pub target_xy: (f64, f64),
    pub full_frame: PcaOptions,
    pub annular: AnnularOptions,
}

impl Default for DetectionSweepConfig {
    fn default() -> Self {
        Self {
            ncomps: (1..50).step_by(2).collect(),
            target_xy: (58.5, 35.5),
            full_frame: PcaOptions::default(),
            annular: AnnularOptions::default(),
        }
    }
}

/// The real companion, removed before injecting fake ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealCompanion {
    pub separation_arcsec: f64,
    /// Position angle in degrees, counter-clockwise from +x.
    pub theta: f64,
    pub flux: f64,
}

impl Default for RealCompanion {
    fn default() -> Self {
        // Beta Pic b, Absil et al. (2013)
        Self {
            separation_arcsec: 0.452,
            theta: 211.2 + 90.0,
            flux: 648.2,
        }
    }
}

impl RealCompanion {
    pub fn to_known(&self, instrument: &Instrument) -> KnownCompanion {
        KnownCompanion {
            radius: instrument.arcsec_to_pixels(self.separation_arcsec),
            theta: self.theta,
            flux: self.flux,
        }
    }
}

/// A fake companion injected into the planet-free cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectedCompanion {
    pub label: String,
    pub flux: f64,
    /// Separation in pixels.
    pub radius: f64,
    pub theta: f64,
}

impl InjectedCompanion {
    fn new(label: &str, flux: f64, radius: f64, theta: f64) -> Self {
        Self {
            label: label.to_string(),
            flux,
            radius,
            theta,
        }
    }
}

/// ncomp sweep on the cube with injected companions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionSweepConfig {
    pub ncomps: Vec<usize>,
    pub full_frame: PcaOptions,
    pub annular: AnnularOptions,
}

impl Default for InjectionSweepConfig {
    fn default() -> Self {
        Self {
            ncomps: vec![10, 20, 30, 40, 50, 60],
            full_frame: PcaOptions::default(),
            annular: AnnularOptions {
                radius_int: 10.0,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub instrument: String,
    pub detection_sweep: DetectionSweepConfig,
    pub real_companion: RealCompanion,
    /// Injected in order; figures show one panel each, in the same order.
    pub injected: Vec<InjectedCompanion>,
    pub injection_sweep: InjectionSweepConfig,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            instrument: "naco".to_string(),
            detection_sweep: DetectionSweepConfig::default(),
            real_companion: RealCompanion::default(),
            injected: vec![
                InjectedCompanion::new("far-bright", 400.0, 45.0, 305.0),
                InjectedCompanion::new("far-dim", 200.0, 45.0, 225.0),
                InjectedCompanion::new("near-bright", 400.0, 15.0, 135.0),
            ],
            injection_sweep: InjectionSweepConfig::default(),
        }
    }
}

impl Scenario {
    /// Read and validate a scenario file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        let scenario: Scenario = serde_json::from_str(&text)
            .with_context(|| format!("parsing scenario {}", path.display()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).with_context(|| format!("writing scenario {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.instrument()?;
        for (name, ncomps) in [
            ("detection_sweep", &self.detection_sweep.ncomps),
            ("injection_sweep", &self.injection_sweep.ncomps),
        ] {
            if ncomps.is_empty() {
                bail!("{name}.ncomps is empty");
            }
            if ncomps.contains(&0) {
                bail!("{name}.ncomps contains 0");
            }
        }
        for companion in &self.injected {
            if companion.label.trim().is_empty() {
                bail!("injected companion with empty label");
            }
        }
        Ok(())
    }

    pub fn instrument(&self) -> Result<Instrument> {
        Instrument::by_name(&self.instrument).with_context(|| {
            format!(
                "unknown instrument '{}', expected one of {:?}",
                self.instrument,
                Instrument::known_names()
            )
        })
    }

    /// Replace the ncomp values of both sweeps.
    pub fn with_ncomps(mut self, ncomps: &[usize]) -> Self {
        self.detection_sweep.ncomps = ncomps.to_vec();
        self.injection_sweep.ncomps = ncomps.to_vec();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_beta_pic_analysis() {
        let scenario = Scenario::default();
        assert_eq!(scenario.detection_sweep.ncomps.len(), 25);
        assert_eq!(scenario.detection_sweep.ncomps.last(), Some(&49));
        assert_eq!(scenario.detection_sweep.annular.radius_int, 0.0);
        assert_eq!(scenario.injection_sweep.annular.radius_int, 10.0);
        assert_eq!(scenario.injected.len(), 3);

        let known = scenario
            .real_companion
            .to_known(&scenario.instrument().unwrap());
        assert_relative_eq!(known.radius, 0.452 / 0.02719, epsilon = 1e-12);
        assert_relative_eq!(known.theta, 301.2, epsilon = 1e-12);
        scenario.validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let scenario: Scenario =
            serde_json::from_str(r#"{"injection_sweep": {"ncomps": [5, 6]}}"#).unwrap();
        assert_eq!(scenario.injection_sweep.ncomps, vec![5, 6]);
        assert_eq!(scenario.injection_sweep.annular.asize, 4.0);
        assert_eq!(scenario.detection_sweep, DetectionSweepConfig::default());
        assert_eq!(scenario.instrument, "naco");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        let scenario = Scenario::default().with_ncomps(&[2, 4]);
        scenario.save(&path).unwrap();
        assert_eq!(Scenario::load(&path).unwrap(), scenario);
    }

    #[test]
    fn test_validation_failures() {
        let empty = Scenario::default().with_ncomps(&[]);
        assert!(empty.validate().is_err());

        let zero = Scenario::default().with_ncomps(&[0, 1]);
        assert!(zero.validate().is_err());

        let mut unlabeled = Scenario::default();
        unlabeled.injected[0].label = " ".to_string();
        assert!(unlabeled.validate().is_err());

        let unknown = Scenario {
            instrument: "hubble".to_string(),
            ..Default::default()
        };
        let err = unknown.validate().unwrap_err();
        assert!(err.to_string().contains("hubble"));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = Scenario::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
    }
}
