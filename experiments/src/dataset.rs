//! ADI dataset on disk: a centered cube, an off-axis PSF and the
//! de-rotation angles, stored as `{prefix}cube_cen`, `{prefix}psf` and
//! `{prefix}derot_angles` FITS files.

use anyhow::{bail, Context, Result};
use hcikit::io::{open_fits_cube, open_fits_frame, open_fits_vector, write_fits_cube, write_fits_frame};
use hcikit::{frame_center, normalize_psf, NormalizeOptions};
use ndarray::{Array2, Array3};
use std::path::Path;

pub const CUBE_SUFFIX: &str = "cube_cen";
pub const PSF_SUFFIX: &str = "psf";
pub const ANGLES_SUFFIX: &str = "derot_angles";

#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub cube: Array3<f64>,
    pub angles: Vec<f64>,
    /// PSF normalized to unit flux in a 1-FWHM aperture.
    pub psf: Array2<f64>,
    /// Flux of the raw PSF in a 1-FWHM aperture.
    pub psf_flux: f64,
    pub fwhm: f64,
}

impl Dataset {
    /// Load `{prefix}cube_cen`, `{prefix}psf` and `{prefix}derot_angles`.
    pub fn load(prefix: &str) -> Result<Self> {
        let cube_path = format!("{prefix}{CUBE_SUFFIX}");
        let psf_path = format!("{prefix}{PSF_SUFFIX}");
        let angles_path = format!("{prefix}{ANGLES_SUFFIX}");

        let cube = open_fits_cube(&cube_path).with_context(|| format!("loading cube {cube_path}"))?;
        let psf = open_fits_frame(&psf_path).with_context(|| format!("loading PSF {psf_path}"))?;
        let angles =
            open_fits_vector(&angles_path).with_context(|| format!("loading angles {angles_path}"))?;
        log::info!(
            "loaded {}: cube {:?}, PSF {:?}, {} angles",
            prefix,
            cube.dim(),
            psf.dim(),
            angles.len()
        );

        Self::from_parts(prefix, cube, angles, &psf)
    }

    /// Validate the pieces and normalize the PSF.
    pub fn from_parts(name: &str, cube: Array3<f64>, angles: Vec<f64>, raw_psf: &Array2<f64>) -> Result<Self> {
        let frames = cube.dim().0;
        if frames != angles.len() {
            bail!("{name}: cube has {frames} frames but {} angles were given", angles.len());
        }
        if frames < 2 {
            bail!("{name}: need at least 2 frames, got {frames}");
        }

        let normalized = normalize_psf(&raw_psf.view(), &NormalizeOptions::default())
            .with_context(|| format!("normalizing PSF of {name}"))?;
        log::info!(
            "PSF FWHM {:.3} px, flux {:.3} in a 1-FWHM aperture",
            normalized.fwhm,
            normalized.flux
        );

        Ok(Self {
            name: name.to_string(),
            cube,
            angles,
            psf: normalized.psf,
            psf_flux: normalized.flux,
            fwhm: normalized.fwhm,
        })
    }

    pub fn frames(&self) -> usize {
        self.cube.dim().0
    }

    /// Frame center as `(x, y)`.
    pub fn center(&self) -> (f64, f64) {
        let (_, ny, nx) = self.cube.dim();
        let (cy, cx) = frame_center((ny, nx));
        (cx, cy)
    }
}

/// Write a dataset in the layout [`Dataset::load`] reads, with a raw PSF.
pub fn write_dataset(prefix: &str, cube: &Array3<f64>, angles: &[f64], psf: &Array2<f64>) -> Result<()> {
    if let Some(parent) = Path::new(prefix).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    write_fits_cube(&cube.view(), format!("{prefix}{CUBE_SUFFIX}.fits"))?;
    write_fits_frame(&psf.view(), format!("{prefix}{PSF_SUFFIX}.fits"))?;
    let angles = Array2::from_shape_vec((1, angles.len()), angles.to_vec())?;
    write_fits_frame(&angles.view(), format!("{prefix}{ANGLES_SUFFIX}.fits"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;
    use test_helpers::synthetic::SyntheticAdi;

    #[test]
    fn test_round_trip_through_fits() {
        let dir = tempdir().unwrap();
        let prefix = format!("{}/naco_betapic_", dir.path().display());
        let data = SyntheticAdi {
            size: 32,
            frames: 6,
            ..Default::default()
        }
        .build();

        write_dataset(&prefix, &data.cube, &data.angles, &data.psf).unwrap();
        let dataset = Dataset::load(&prefix).unwrap();

        assert_eq!(dataset.frames(), 6);
        assert_eq!(dataset.cube, data.cube);
        assert_eq!(dataset.angles, data.angles);
        assert_eq!(dataset.center(), (16.0, 16.0));
        assert_relative_eq!(dataset.fwhm, 4.0, max_relative = 0.01);
        assert!(dataset.psf_flux > 0.0);
    }

    #[test]
    fn test_angle_count_mismatch() {
        let data = SyntheticAdi {
            size: 32,
            frames: 4,
            ..Default::default()
        }
        .build();
        let err = Dataset::from_parts("test", data.cube, vec![0.0; 3], &data.psf).unwrap_err();
        assert!(err.to_string().contains("4 frames"));
    }

    #[test]
    fn test_missing_files_name_the_path() {
        let dir = tempdir().unwrap();
        let prefix = format!("{}/absent_", dir.path().display());
        let err = Dataset::load(&prefix).unwrap_err();
        assert!(format!("{err:#}").contains("absent_cube_cen"));
    }
}
