//! ncomp sweeps comparing full-frame and annular PCA.

use crate::dataset::Dataset;
use crate::scenario::Scenario;
use anyhow::{Context, Result};
use hcikit::{
    inject_companions, pca_annular, pca_fullframe, planet_free_cube, snr, AnnularOptions,
    CompanionSpec, PcaOptions, SnrOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// One S/N per ncomp; `None` where the measurement failed.
pub type SnrSeries = Vec<Option<f64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSweep {
    pub ncomps: Vec<usize>,
    pub target_xy: (f64, f64),
    pub full_frame: SnrSeries,
    pub annular: SnrSeries,
}

/// S/N of one injected source across the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSeries {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub full_frame: SnrSeries,
    pub annular: SnrSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionSweep {
    pub ncomps: Vec<usize>,
    pub sources: Vec<SourceSeries>,
}

/// The two reductions of one ncomp step.
struct Reductions {
    full_frame: Array2<f64>,
    annular: Array2<f64>,
}

fn progress_bar(len: usize, message: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) {msg}")?
            .progress_chars("=>-"),
    );
    pb.set_message(message);
    Ok(pb)
}

fn reduce(
    cube: &Array3<f64>,
    angles: &[f64],
    ncomp: usize,
    full_frame: &PcaOptions,
    annular: &AnnularOptions,
) -> Result<Reductions> {
    let full_options = PcaOptions {
        ncomp,
        ..full_frame.clone()
    };
    // The annulus FWHM sets the rotation threshold and stays as configured
    let annular_options = AnnularOptions {
        ncomp,
        ..annular.clone()
    };
    let full = pca_fullframe(&cube.view(), angles, &full_options)
        .with_context(|| format!("full-frame PCA with ncomp {ncomp}"))?;
    let annu = pca_annular(&cube.view(), angles, &annular_options)
        .with_context(|| format!("annular PCA with ncomp {ncomp}"))?;
    Ok(Reductions {
        full_frame: full.frame,
        annular: annu.frame,
    })
}

/// S/N at `(x, y)`, or `None` with a warning.
fn measure(frame: &Array2<f64>, xy: (f64, f64), fwhm: f64, what: &str, ncomp: usize) -> Option<f64> {
    match snr(&frame.view(), xy, fwhm, &SnrOptions::default()) {
        Ok(m) => Some(m.snr),
        Err(e) => {
            log::warn!(
                "S/N of {what} at ({:.1}, {:.1}) with ncomp {ncomp} failed: {e}",
                xy.0,
                xy.1
            );
            None
        }
    }
}

/// Sweep ncomp on the cube as observed and measure the real companion.
pub fn detection_sweep(dataset: &Dataset, scenario: &Scenario) -> Result<DetectionSweep> {
    detection_sweep_with(dataset, scenario, |_, _, _| Ok(()))
}

/// [`detection_sweep`] with a callback receiving both residual frames.
pub fn detection_sweep_with<F>(
    dataset: &Dataset,
    scenario: &Scenario,
    mut on_residuals: F,
) -> Result<DetectionSweep>
where
    F: FnMut(usize, &Array2<f64>, &Array2<f64>) -> Result<()>,
{
    let config = &scenario.detection_sweep;
    let pb = progress_bar(config.ncomps.len(), "detection sweep")?;

    let mut full_frame = Vec::with_capacity(config.ncomps.len());
    let mut annular = Vec::with_capacity(config.ncomps.len());
    for &ncomp in &config.ncomps {
        let reductions = reduce(
            &dataset.cube,
            &dataset.angles,
            ncomp,
            &config.full_frame,
            &config.annular,
        )?;
        let full = measure(&reductions.full_frame, config.target_xy, dataset.fwhm, "full-frame", ncomp);
        let annu = measure(&reductions.annular, config.target_xy, dataset.fwhm, "annular", ncomp);
        log::debug!("ncomp {ncomp}: full-frame {full:?}, annular {annu:?}");
        on_residuals(ncomp, &reductions.full_frame, &reductions.annular)?;

        full_frame.push(full);
        annular.push(annu);
        pb.inc(1);
    }
    pb.finish_with_message("detection sweep done");

    Ok(DetectionSweep {
        ncomps: config.ncomps.clone(),
        target_xy: config.target_xy,
        full_frame,
        annular,
    })
}

/// Remove the real companion, inject the configured ones and sweep ncomp.
///
/// `on_residuals(ncomp, full_frame, annular)` sees the residual frames of
/// each step, e.g. to render them.
pub fn injection_sweep<F>(dataset: &Dataset, scenario: &Scenario, mut on_residuals: F) -> Result<InjectionSweep>
where
    F: FnMut(usize, &Array2<f64>, &Array2<f64>) -> Result<()>,
{
    let instrument = scenario.instrument()?;
    let planet = scenario.real_companion.to_known(&instrument);
    log::info!(
        "removing companion at r = {:.2} px, theta = {:.1} deg, flux {:.1}",
        planet.radius,
        planet.theta,
        planet.flux
    );
    let mut cube = planet_free_cube(&[planet], &dataset.cube.view(), &dataset.angles, &dataset.psf.view())
        .context("removing the real companion")?;

    let mut sources = Vec::with_capacity(scenario.injected.len());
    for companion in &scenario.injected {
        let spec = CompanionSpec::single(companion.flux, companion.radius, companion.theta);
        let injection = inject_companions(&cube.view(), &dataset.psf.view(), &dataset.angles, &spec)
            .with_context(|| format!("injecting {}", companion.label))?;
        cube = injection.cube;
        let (x, y) = injection.positions[0];
        log::info!(
            "injected {} (flux {}) at ({x:.2}, {y:.2})",
            companion.label,
            companion.flux
        );
        sources.push(SourceSeries {
            label: companion.label.clone(),
            x,
            y,
            full_frame: Vec::new(),
            annular: Vec::new(),
        });
    }

    let config = &scenario.injection_sweep;
    let pb = progress_bar(config.ncomps.len(), "injection sweep")?;
    for &ncomp in &config.ncomps {
        let reductions = reduce(
            &cube,
            &dataset.angles,
            ncomp,
            &config.full_frame,
            &config.annular,
        )?;
        for source in sources.iter_mut() {
            let xy = (source.x, source.y);
            let full = measure(&reductions.full_frame, xy, dataset.fwhm, &source.label, ncomp);
            let annu = measure(&reductions.annular, xy, dataset.fwhm, &source.label, ncomp);
            log::debug!("ncomp {ncomp} {}: full-frame {full:?}, annular {annu:?}", source.label);
            source.full_frame.push(full);
            source.annular.push(annu);
        }
        on_residuals(ncomp, &reductions.full_frame, &reductions.annular)?;
        pb.inc(1);
    }
    pb.finish_with_message("injection sweep done");

    Ok(InjectionSweep {
        ncomps: config.ncomps.clone(),
        sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::InjectedCompanion;
    use test_helpers::synthetic::SyntheticAdi;

    fn small_dataset(spec: &SyntheticAdi) -> Dataset {
        let data = spec.build();
        Dataset::from_parts("synthetic", data.cube, data.angles, &data.psf).unwrap()
    }

    #[test]
    fn test_measure_failure_is_none() {
        let frame = Array2::<f64>::zeros((32, 32));
        // Inside the central exclusion zone
        assert_eq!(measure(&frame, (16.0, 17.0), 4.0, "test", 1), None);
        // Empty frame: zero noise
        assert_eq!(measure(&frame, (16.0, 26.0), 4.0, "test", 1), None);
    }

    #[test]
    fn test_detection_sweep_records_every_ncomp() {
        let spec = SyntheticAdi {
            frames: 12,
            ..Default::default()
        }
        .with_companion(16.0, 45.0, 2.0);
        let dataset = small_dataset(&spec);
        let mut scenario = Scenario::default().with_ncomps(&[1, 3]);
        scenario.detection_sweep.target_xy = spec.companion_xy(&spec.companions[0]);

        let mut seen = Vec::new();
        let sweep = detection_sweep_with(&dataset, &scenario, |ncomp, full, annu| {
            assert_eq!(full.dim(), (64, 64));
            assert_eq!(annu.dim(), (64, 64));
            seen.push(ncomp);
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![1, 3]);
        assert_eq!(sweep.ncomps, vec![1, 3]);
        assert_eq!(sweep.full_frame.len(), 2);
        assert_eq!(sweep.annular.len(), 2);
        assert!(sweep.full_frame.iter().all(Option::is_some));
    }

    #[test]
    fn test_injection_sweep_positions_and_lengths() {
        let spec = SyntheticAdi {
            frames: 12,
            ..Default::default()
        };
        let dataset = small_dataset(&spec);
        let mut scenario = Scenario::default().with_ncomps(&[2]);
        scenario.real_companion.flux = 0.0;
        scenario.injected = vec![
            InjectedCompanion {
                label: "outer".to_string(),
                flux: 40.0,
                radius: 20.0,
                theta: 0.0,
            },
            InjectedCompanion {
                label: "inner".to_string(),
                flux: 40.0,
                radius: 12.0,
                theta: 90.0,
            },
        ];
        scenario.injection_sweep.annular.radius_int = 4.0;

        let mut calls = 0;
        let sweep = injection_sweep(&dataset, &scenario, |_, _, _| {
            calls += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(sweep.sources.len(), 2);
        let outer = &sweep.sources[0];
        assert!((outer.x - 52.0).abs() < 1e-9 && (outer.y - 32.0).abs() < 1e-9);
        let inner = &sweep.sources[1];
        assert!((inner.x - 32.0).abs() < 1e-9 && (inner.y - 44.0).abs() < 1e-9);
        for source in &sweep.sources {
            assert_eq!(source.full_frame.len(), 1);
            assert_eq!(source.annular.len(), 1);
        }
    }

    #[test]
    fn test_annular_sweep_keeps_configured_fwhm() {
        let spec = SyntheticAdi {
            fwhm: 6.0,
            frames: 12,
            ..Default::default()
        }
        .with_companion(18.0, 60.0, 3.0);
        let dataset = small_dataset(&spec);
        assert!((dataset.fwhm - 6.0).abs() < 0.1);

        let mut scenario = Scenario::default().with_ncomps(&[2]);
        scenario.detection_sweep.target_xy = spec.companion_xy(&spec.companions[0]);
        assert_eq!(scenario.detection_sweep.annular.fwhm, 4.0);

        let sweep = detection_sweep(&dataset, &scenario).unwrap();

        let direct = pca_annular(
            &dataset.cube.view(),
            &dataset.angles,
            &AnnularOptions {
                ncomp: 2,
                ..scenario.detection_sweep.annular.clone()
            },
        )
        .unwrap();
        let expected = snr(
            &direct.frame.view(),
            scenario.detection_sweep.target_xy,
            dataset.fwhm,
            &SnrOptions::default(),
        )
        .unwrap()
        .snr;
        assert_eq!(sweep.annular, vec![Some(expected)]);
    }

    #[test]
    fn test_callback_error_aborts_sweep() {
        let spec = SyntheticAdi {
            frames: 8,
            size: 32,
            ..Default::default()
        };
        let dataset = small_dataset(&spec);
        let scenario = Scenario::default().with_ncomps(&[1, 2]);
        let err = detection_sweep_with(&dataset, &scenario, |ncomp, _, _| {
            anyhow::bail!("stop at {ncomp}")
        })
        .unwrap_err();
        assert!(err.to_string().contains("stop at 1"));
    }
}
