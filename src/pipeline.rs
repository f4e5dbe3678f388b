//! The reconstruction driver: rescale, modulate, weight, backproject and
//! deconvolve one tilt series.

use nalgebra::{Matrix4, Vector3};
use ndarray::Array3;
use tracing::{info, instrument};

use crate::backproject::{backproject, backproject_psf, projected_centres, Interpolation};
use crate::deconvolve::correct_3d_rs;
use crate::error::{ReconError, Result};
use crate::geometry::{is_unit_ratio, rescale_projections, VolumeExtent, VoxelGrid};
use crate::modulate::modulate_stack;
use crate::parallel::Workers;
use crate::preweight::pre_weight;
use crate::resample::{resample_stack, zero_dc};
use crate::tomogram::Tomogram;

/// How the reconstruction compensates for uneven Fourier sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Weighting {
    #[default]
    None,
    /// Each frame is weighted in 2D before backprojection.
    PreWeighted2D,
    /// The volume is divided by the backprojected point-spread function.
    Deconvolved3D,
}

impl Weighting {
    /// Build from the two command-line switches, which exclude each other.
    pub fn from_flags(weight_3d: bool, weight_2d: bool) -> Result<Self> {
        match (weight_3d, weight_2d) {
            (true, true) => Err(ReconError::ExclusiveWeighting),
            (true, false) => Ok(Weighting::Deconvolved3D),
            (false, true) => Ok(Weighting::PreWeighted2D),
            (false, false) => Ok(Weighting::None),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconConfig {
    pub weighting: Weighting,
    /// Signal-to-noise ratio; the deconvolution regularizes with `1/snr`.
    pub snr: f64,
    pub apply_ctf: bool,
    pub zero_dc: bool,
    /// Backprojection edge taper in working pixels.
    pub taper: f64,
    /// Volume depth in original pixels; `None` uses the tomogram's depth.
    pub thickness: Option<f64>,
    /// World position of voxel `(0, 0, 0)`, original pixels.
    pub origin: [f64; 3],
    pub width: Option<usize>,
    pub height: Option<usize>,
    /// Working binning relative to the original pixels.
    pub binning: f64,
    /// Binning of the stored stack.
    pub stack_binning: f64,
    pub threads: usize,
    pub interpolation: Interpolation,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            weighting: Weighting::None,
            snr: 10.0,
            apply_ctf: true,
            zero_dc: false,
            taper: 0.0,
            thickness: None,
            origin: [1.0, 1.0, 1.0],
            width: None,
            height: None,
            binning: 8.0,
            stack_binning: 1.0,
            threads: 1,
            interpolation: Interpolation::Linear,
        }
    }
}

impl ReconConfig {
    /// Reject settings that cannot produce a volume. Runs before any file is
    /// touched.
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f64| {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(ReconError::InvalidConfig(format!("{} must be positive, got {}", name, v)))
            }
        };

        positive("binning", self.binning)?;
        positive("stack binning", self.stack_binning)?;
        positive("SNR", self.snr)?;

        if self.threads == 0 {
            return Err(ReconError::InvalidConfig("at least one thread is required".to_string()));
        }
        if !(self.taper >= 0.0 && self.taper.is_finite()) {
            return Err(ReconError::InvalidConfig(format!(
                "taper distance must be non-negative, got {}",
                self.taper
            )));
        }
        if let Some(t) = self.thickness {
            positive("thickness", t)?;
        }
        if self.origin.iter().any(|v| !v.is_finite()) {
            return Err(ReconError::InvalidConfig(format!("origin is not finite: {:?}", self.origin)));
        }
        Ok(())
    }

    fn needs_psf(&self) -> bool {
        self.apply_ctf || self.weighting == Weighting::Deconvolved3D
    }
}

/// A finished volume and its voxel size in Å.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// `(z, y, x)`
    pub volume: Array3<f32>,
    pub sampling_rate: f64,
}

/// Stack, matrices and pixel size at the working sampling.
struct Working {
    stack: Array3<f32>,
    projections: Vec<Matrix4<f64>>,
    pixel_size: f64,
}

/// Bring the stored stack and its matrices to the working binning.
///
/// A unit binning keeps both as loaded. Otherwise the matrices are rescaled,
/// and the stack is resampled only when it is not already stored at that
/// binning; resampling scales the pixel size by the same ratio.
fn working_set(
    stack: Array3<f32>,
    projections: Vec<Matrix4<f64>>,
    pixel_size: f64,
    config: &ReconConfig,
    workers: &Workers,
) -> Result<Working> {
    let binning = config.binning;
    if is_unit_ratio(binning) {
        return Ok(Working { stack, projections, pixel_size });
    }

    let ratio = binning / config.stack_binning;
    let (stack, pixel_size) = if is_unit_ratio(ratio) {
        (stack, pixel_size)
    } else {
        (resample_stack(&stack, ratio, workers)?, pixel_size * ratio)
    };

    Ok(Working {
        stack,
        projections: rescale_projections(&projections, binning),
        pixel_size,
    })
}

/// Reconstruct one tomogram.
#[instrument(skip_all, fields(tomogram = %tomogram.name))]
pub fn reconstruct(tomogram: Tomogram, config: &ReconConfig) -> Result<Reconstruction> {
    config.validate()?;
    let workers = Workers::new(config.threads)?;

    let Tomogram {
        mut stack,
        projections,
        ctfs,
        pixel_size,
        dims: (w0, h0, d0),
        ..
    } = tomogram;

    info!(width = w0, height = h0, frames = stack.dim().0, "tilt series");

    let thickness = match config.thickness {
        Some(t) => t,
        None => {
            info!(thickness = d0, "using thickness from tomogram metadata");
            d0 as f64
        }
    };

    if config.zero_dc {
        zero_dc(&mut stack, &workers);
    }

    let binning = config.binning;
    let extent = VolumeExtent::derive((w0, h0), config.width, config.height, thickness, binning)?;
    info!(
        width = extent.width,
        height = extent.height,
        depth = extent.depth,
        "output volume"
    );

    let Working {
        mut stack,
        projections,
        pixel_size: working_pixel_size,
    } = working_set(stack, projections, pixel_size, config, &workers)?;

    let [x0, y0, z0] = config.origin;
    let grid = VoxelGrid::new(Vector3::new(x0, y0, z0), binning);

    let psf_stack = if config.apply_ctf {
        let anchors = projected_centres(&projections, &grid, extent.shape());
        Some(modulate_stack(&mut stack, &ctfs, &anchors, working_pixel_size, &workers)?)
    } else {
        None
    };

    if config.weighting == Weighting::PreWeighted2D {
        stack = pre_weight(&stack, &projections, &workers)?;
    }

    info!(threads = workers.threads(), "backprojecting");
    let mut volume = Array3::<f32>::zeros(extent.shape());
    backproject(
        &stack,
        &projections,
        &mut volume,
        &workers,
        &grid,
        config.interpolation,
        config.taper,
    )?;

    if config.needs_psf() {
        let mut psf = Array3::<f32>::zeros(extent.shape());
        match &psf_stack {
            Some(psf_stack) => backproject(
                psf_stack,
                &projections,
                &mut psf,
                &workers,
                &grid,
                config.interpolation,
                config.taper,
            )?,
            None => backproject_psf(&stack, &projections, &mut psf, &workers, &grid)?,
        }

        info!(snr = config.snr, "correcting for the point-spread function");
        correct_3d_rs(&mut volume, &psf, 1.0 / config.snr, &workers)?;
    }

    Ok(Reconstruction {
        volume,
        sampling_rate: pixel_size * binning,
    })
}
