//! Pixel scales of common high-contrast imagers.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub name: Cow<'static, str>,
    /// Arcseconds per pixel.
    pub pixel_scale: f64,
    /// Telescope aperture in meters.
    pub diameter: f64,
}

pub const VLT_NACO: Instrument = Instrument {
    name: Cow::Borrowed("naco"),
    pixel_scale: 0.02719,
    diameter: 8.2,
};

pub const VLT_SPHERE_IRDIS: Instrument = Instrument {
    name: Cow::Borrowed("irdis"),
    pixel_scale: 0.01225,
    diameter: 8.2,
};

pub const VLT_SPHERE_IFS: Instrument = Instrument {
    name: Cow::Borrowed("ifs"),
    pixel_scale: 0.00746,
    diameter: 8.2,
};

pub const KECK_NIRC2: Instrument = Instrument {
    name: Cow::Borrowed("nirc2"),
    pixel_scale: 0.009942,
    diameter: 10.0,
};

static KNOWN: [Instrument; 4] = [VLT_NACO, VLT_SPHERE_IRDIS, VLT_SPHERE_IFS, KECK_NIRC2];

impl Instrument {
    /// Look up a built-in instrument, ignoring case.
    pub fn by_name(name: &str) -> Option<Self> {
        KNOWN
            .iter()
            .find(|known| known.name.eq_ignore_ascii_case(name.trim()))
            .cloned()
    }

    /// Names accepted by [`Instrument::by_name`].
    pub fn known_names() -> Vec<&'static str> {
        KNOWN.iter().map(|known| known.name.as_ref()).collect()
    }

    pub fn arcsec_to_pixels(&self, arcsec: f64) -> f64 {
        arcsec / self.pixel_scale
    }

    pub fn pixels_to_arcsec(&self, pixels: f64) -> f64 {
        pixels * self.pixel_scale
    }

    /// Diffraction limit `lambda / D` in pixels for a wavelength in microns.
    pub fn lambda_over_d_pixels(&self, wavelength_um: f64) -> f64 {
        let radians = wavelength_um * 1e-6 / self.diameter;
        radians.to_degrees() * 3600.0 / self.pixel_scale
    }
}
