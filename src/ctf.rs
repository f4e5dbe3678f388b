//! Contrast transfer function of the microscope.
//!
//! Frequencies are in cycles per Ångström, defoci in Ångström, the
//! astigmatism azimuth and phase shift in degrees, voltage in kV and
//! spherical aberration in mm.

use serde::{Deserialize, Serialize};

use crate::error::{ReconError, Result};

/// Anything that maps a physical 2D frequency to a real transfer coefficient.
pub trait TransferFunction {
    fn value(&self, xa: f64, ya: f64) -> f64;
}

impl<F> TransferFunction for F
where
    F: Fn(f64, f64) -> f64,
{
    fn value(&self, xa: f64, ya: f64) -> f64 {
        self(xa, ya)
    }
}

/// Per-tomogram optics shared by all frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Optics {
    /// Pixel size of the stored stack, Å.
    pub pixel_size: f64,
    /// Acceleration voltage, kV.
    pub voltage: f64,
    /// Spherical aberration, mm.
    pub cs: f64,
    pub amplitude_contrast: f64,
}

/// Per-frame CTF parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CtfParams {
    pub defocus_u: f64,
    pub defocus_v: f64,
    pub defocus_angle: f64,
    #[serde(default)]
    pub phase_shift: f64,
    #[serde(default)]
    pub b_factor: f64,
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

fn unit_scale() -> f64 {
    1.0
}

/// Precomputed CTF of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ctf {
    defocus_average: f64,
    defocus_deviation: f64,
    azimuth: f64,
    // aberration terms
    k1: f64,
    k2: f64,
    k3: f64,
    k4: f64,
    k5: f64,
    scale: f64,
}

impl Ctf {
    pub fn new(optics: &Optics, params: &CtfParams) -> Result<Self> {
        if !(optics.voltage > 0.0) {
            return Err(ReconError::InvalidMetadata(format!(
                "voltage must be positive, got {}",
                optics.voltage
            )));
        }
        if !(0.0..1.0).contains(&optics.amplitude_contrast) {
            return Err(ReconError::InvalidMetadata(format!(
                "amplitude contrast must lie in [0, 1), got {}",
                optics.amplitude_contrast
            )));
        }

        let volts = optics.voltage * 1e3;
        // relativistic electron wavelength, Å
        let lambda = 12.2643247 / (volts * (1.0 + volts * 0.978466e-6)).sqrt();
        let cs = optics.cs * 1e7;
        let q0 = optics.amplitude_contrast;

        Ok(Self {
            defocus_average: -(params.defocus_u + params.defocus_v) * 0.5,
            defocus_deviation: -(params.defocus_u - params.defocus_v) * 0.5,
            azimuth: params.defocus_angle.to_radians(),
            k1: std::f64::consts::PI * lambda,
            k2: std::f64::consts::FRAC_PI_2 * cs * lambda.powi(3),
            k3: (q0 / (1.0 - q0 * q0).sqrt()).atan(),
            k4: -params.b_factor / 4.0,
            k5: params.phase_shift.to_radians(),
            scale: params.scale,
        })
    }

    /// Defocus along the direction of `(xa, ya)`.
    fn defocus(&self, xa: f64, ya: f64) -> f64 {
        if xa == 0.0 && ya == 0.0 {
            return self.defocus_average;
        }
        let angle = ya.atan2(xa);
        self.defocus_average + self.defocus_deviation * (2.0 * (angle - self.azimuth)).cos()
    }
}

impl TransferFunction for Ctf {
    fn value(&self, xa: f64, ya: f64) -> f64 {
        let u2 = xa * xa + ya * ya;
        let u4 = u2 * u2;
        let chi = self.k1 * self.defocus(xa, ya) * u2 + self.k2 * u4 - self.k5 - self.k3;

        let mut c = -chi.sin();
        if self.k4 != 0.0 {
            c *= (self.k4 * u2).exp();
        }
        c * self.scale
    }
}
