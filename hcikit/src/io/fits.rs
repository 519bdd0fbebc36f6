//! FITS reading and writing for frames, cubes and angle lists.
//!
//! Arrays are returned in storage order: axis 0 of a frame is NAXIS2 and
//! row 0 is the first row in the file. No vertical flip is applied, so pixel
//! coordinates match the ones in the file.

use fitsio::compat::fitsfile::FitsFile;
use fitsio::compat::hdu::FitsHdu;
use fitsio::compat::images::{ImageDescription, ImageType, ReadImage, WriteImage};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    FitsIo(#[from] fitsio::compat::errors::Error),
    #[error("FITS file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("{}: expected {expected}, found {found} axes", .path.display())]
    UnexpectedDimensions {
        path: PathBuf,
        expected: String,
        found: usize,
    },
    #[error("Invalid data type in HDU: {0}")]
    InvalidDataType(String),
}

/// Raw image: axis lengths in FITS order (NAXIS1 first) and flat data.
struct FitsImage {
    path: PathBuf,
    axes: Vec<usize>,
    data: Vec<f64>,
}

impl FitsImage {
    /// Axis lengths in array order, slowest first.
    fn shape(&self) -> Vec<usize> {
        self.axes.iter().rev().copied().collect()
    }
}

/// Append `.fits` when `path` has no FITS extension and does not exist as given.
pub fn resolve_fits_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    let has_extension = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("fits") || ext.eq_ignore_ascii_case("fit"))
        .unwrap_or(false);
    if has_extension || path.exists() {
        return path.to_path_buf();
    }
    let mut with_extension = path.as_os_str().to_os_string();
    with_extension.push(".fits");
    PathBuf::from(with_extension)
}

fn axis_length(fptr: &FitsFile, hdu: &FitsHdu, key: &str) -> Result<usize, FitsError> {
    let value = hdu
        .read_key::<i64>(fptr, key)
        .map_err(|_| FitsError::InvalidDataType(format!("missing {key} keyword")))?;
    usize::try_from(value).map_err(|_| FitsError::InvalidDataType(format!("{key} = {value}")))
}

/// First HDU that carries image data.
fn read_first_image<P: AsRef<Path>>(path: P) -> Result<FitsImage, FitsError> {
    let path = resolve_fits_path(path);
    if !path.exists() {
        return Err(FitsError::MissingFile(path));
    }
    let fptr = FitsFile::open(&path)?;

    let mut hdu_idx = 0;
    while let Ok(hdu) = fptr.hdu(hdu_idx) {
        let naxis = hdu.read_key::<i64>(&fptr, "NAXIS").unwrap_or(0);
        if naxis > 0 {
            let mut axes = Vec::with_capacity(naxis as usize);
            for k in 1..=naxis {
                axes.push(axis_length(&fptr, &hdu, &format!("NAXIS{k}"))?);
            }
            let data = f64::read_image(&fptr, &hdu)?;
            let expected: usize = axes.iter().product();
            if data.len() != expected {
                return Err(FitsError::InvalidDataType(format!(
                    "HDU {hdu_idx} holds {} values for axes {:?}",
                    data.len(),
                    axes
                )));
            }
            log::debug!("read {} HDU {} with axes {:?}", path.display(), hdu_idx, axes);
            return Ok(FitsImage { path, axes, data });
        }
        hdu_idx += 1;
    }

    Err(FitsError::UnexpectedDimensions {
        path,
        expected: "an image HDU".to_string(),
        found: 0,
    })
}

fn reshape_error(path: &Path) -> FitsError {
    FitsError::InvalidDataType(format!("cannot reshape image data from {}", path.display()))
}

/// Read a cube `(NAXIS3, NAXIS2, NAXIS1)`. 2-D images become one-frame cubes.
pub fn open_fits_cube<P: AsRef<Path>>(path: P) -> Result<Array3<f64>, FitsError> {
    let image = read_first_image(path)?;
    let shape = image.shape();
    let dims = match shape.as_slice() {
        [n, ny, nx] => (*n, *ny, *nx),
        [ny, nx] => (1, *ny, *nx),
        _ => {
            return Err(FitsError::UnexpectedDimensions {
                path: image.path,
                expected: "2 or 3".to_string(),
                found: shape.len(),
            })
        }
    };
    Array3::from_shape_vec(dims, image.data).map_err(|_| reshape_error(&image.path))
}

/// Read a 2-D image. A cube holding a single plane is accepted.
pub fn open_fits_frame<P: AsRef<Path>>(path: P) -> Result<Array2<f64>, FitsError> {
    let image = read_first_image(path)?;
    let shape = image.shape();
    let dims = match shape.as_slice() {
        [ny, nx] => (*ny, *nx),
        [1, ny, nx] => (*ny, *nx),
        _ => {
            return Err(FitsError::UnexpectedDimensions {
                path: image.path,
                expected: "2".to_string(),
                found: shape.len(),
            })
        }
    };
    Array2::from_shape_vec(dims, image.data).map_err(|_| reshape_error(&image.path))
}

/// Read an image as a flat vector, e.g. a list of parallactic angles.
///
/// At most one axis may be longer than 1, so `(N,)`, `(N, 1)` and `(1, N)`
/// all read the same.
pub fn open_fits_vector<P: AsRef<Path>>(path: P) -> Result<Vec<f64>, FitsError> {
    let image = read_first_image(path)?;
    let long_axes = image.axes.iter().filter(|&&n| n > 1).count();
    if long_axes > 1 {
        return Err(FitsError::UnexpectedDimensions {
            path: image.path,
            expected: "a single non-trivial axis".to_string(),
            found: long_axes,
        });
    }
    Ok(image.data)
}

fn write_primary<P: AsRef<Path>>(
    path: P,
    dimensions: Vec<usize>,
    data: &[f64],
) -> Result<(), FitsError> {
    let mut fptr = FitsFile::create(&path).overwrite().open()?;
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions,
    };
    let hdu = fptr.create_image("PRIMARY", &description)?;
    f64::write_image(&mut fptr, &hdu, data)?;
    Ok(())
}

/// Write a frame as a double-precision image, overwriting `path`.
pub fn write_fits_frame<P: AsRef<Path>>(
    frame: &ArrayView2<f64>,
    path: P,
) -> Result<(), FitsError> {
    let (ny, nx) = frame.dim();
    let data: Vec<f64> = frame.iter().copied().collect();
    write_primary(path, vec![nx, ny], &data)
}

/// Write a cube as a double-precision image, overwriting `path`.
pub fn write_fits_cube<P: AsRef<Path>>(
    cube: &ArrayView3<f64>,
    path: P,
) -> Result<(), FitsError> {
    let (n, ny, nx) = cube.dim();
    let data: Vec<f64> = cube.iter().copied().collect();
    write_primary(path, vec![nx, ny, n], &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_cube_round_trip_keeps_orientation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        let cube = Array3::from_shape_fn((3, 4, 5), |(i, y, x)| (i * 100 + y * 10 + x) as f64 + 0.25);

        write_fits_cube(&cube.view(), &path).unwrap();
        let back = open_fits_cube(&path).unwrap();

        assert_eq!(back.dim(), (3, 4, 5));
        assert_relative_eq!(back[[0, 0, 0]], 0.25);
        assert_relative_eq!(back[[2, 3, 1]], 231.25);
        assert_eq!(back, cube);
    }

    #[test]
    fn test_frame_round_trip_and_promotion() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("psf.fits");
        let frame = Array2::from_shape_fn((6, 7), |(y, x)| (y * 7 + x) as f64);

        write_fits_frame(&frame.view(), &path).unwrap();
        assert_eq!(open_fits_frame(&path).unwrap(), frame);

        let cube = open_fits_cube(&path).unwrap();
        assert_eq!(cube.dim(), (1, 6, 7));
        assert_eq!(cube[[0, 5, 6]], 41.0);
    }

    #[test]
    fn test_vector_accepts_row_and_column() {
        let dir = tempdir().unwrap();
        let angles = [-10.5, -3.0, 4.25, 12.0];

        let row = Array2::from_shape_vec((1, 4), angles.to_vec()).unwrap();
        let row_path = dir.path().join("row.fits");
        write_fits_frame(&row.view(), &row_path).unwrap();
        assert_eq!(open_fits_vector(&row_path).unwrap(), angles.to_vec());

        let column = Array2::from_shape_vec((4, 1), angles.to_vec()).unwrap();
        let column_path = dir.path().join("column.fits");
        write_fits_frame(&column.view(), &column_path).unwrap();
        assert_eq!(open_fits_vector(&column_path).unwrap(), angles.to_vec());

        let image = Array2::<f64>::zeros((2, 3));
        let image_path = dir.path().join("image.fits");
        write_fits_frame(&image.view(), &image_path).unwrap();
        assert!(matches!(
            open_fits_vector(&image_path),
            Err(FitsError::UnexpectedDimensions { found: 2, .. })
        ));
    }

    #[test]
    fn test_extension_is_appended() {
        let dir = tempdir().unwrap();
        let frame = Array2::<f64>::ones((3, 3));
        write_fits_frame(&frame.view(), dir.path().join("naco_psf.fits")).unwrap();

        let bare = dir.path().join("naco_psf");
        assert_eq!(resolve_fits_path(&bare), dir.path().join("naco_psf.fits"));
        assert_eq!(open_fits_frame(&bare).unwrap(), frame);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = open_fits_cube(dir.path().join("nothing")).unwrap_err();
        assert!(matches!(err, FitsError::MissingFile(_)));
        assert!(err.to_string().contains("nothing.fits"));
    }

    #[test]
    fn test_frame_rejects_multi_plane_cube() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        write_fits_cube(&Array3::<f64>::zeros((2, 3, 3)).view(), &path).unwrap();
        assert!(matches!(
            open_fits_frame(&path),
            Err(FitsError::UnexpectedDimensions { found: 3, .. })
        ));
    }
}
