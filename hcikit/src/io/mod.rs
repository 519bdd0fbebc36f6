//! File input/output.

pub mod fits;

pub use fits::{
    open_fits_cube, open_fits_frame, open_fits_vector, resolve_fits_path, write_fits_cube,
    write_fits_frame, FitsError,
};
