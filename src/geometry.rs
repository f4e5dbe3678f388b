//! Working geometry: projection rescaling, output extent and the voxel grid.
//!
//! World coordinates are in original (unbinned) pixels. A projection matrix
//! maps a homogeneous world point to `(x_img, y_img, depth, 1)`; after
//! rescaling by the binning factor the image coordinates are in working
//! pixels.

use nalgebra::{Matrix4, Vector3, Vector4};

use crate::error::{ReconError, Result};

/// Ratios closer to 1 than this are treated as exactly 1.
pub const UNIT_TOLERANCE: f64 = 1e-2;

pub fn is_unit_ratio(ratio: f64) -> bool {
    (ratio - 1.0).abs() < UNIT_TOLERANCE
}

/// Round half up, clamped at zero. Used for every derived dimension.
pub fn round_half_up(x: f64) -> usize {
    (x + 0.5).floor().max(0.0) as usize
}

/// Rescale projection matrices to binning `s`: `M / s` with `M[3][3] = 1`.
///
/// A unit binning returns the input unchanged, bit for bit.
pub fn rescale_projections(projections: &[Matrix4<f64>], binning: f64) -> Vec<Matrix4<f64>> {
    if is_unit_ratio(binning) {
        return projections.to_vec();
    }

    projections
        .iter()
        .map(|m| {
            let mut scaled = *m / binning;
            scaled[(3, 3)] = 1.0;
            scaled
        })
        .collect()
}

/// Output volume size in voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeExtent {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl VolumeExtent {
    /// Derive the working extent.
    ///
    /// - `width`, `height`: explicit footprint, or `None` for `round(w0/s)`
    ///   and `round(h0/s)`
    /// - `thickness`: depth in original pixels, becomes `round(thickness/s)`
    pub fn derive(
        original: (usize, usize),
        width: Option<usize>,
        height: Option<usize>,
        thickness: f64,
        binning: f64,
    ) -> Result<Self> {
        let (w0, h0) = original;
        let extent = Self {
            width: width
                .filter(|&w| w > 0)
                .unwrap_or_else(|| round_half_up(w0 as f64 / binning)),
            height: height
                .filter(|&h| h > 0)
                .unwrap_or_else(|| round_half_up(h0 as f64 / binning)),
            depth: round_half_up(thickness / binning),
        };

        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(ReconError::InvalidConfig(format!(
                "output volume would be empty: {}x{}x{}",
                extent.width, extent.height, extent.depth
            )));
        }
        Ok(extent)
    }

    /// ndarray shape, `(z, y, x)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.depth, self.height, self.width)
    }
}

/// Mapping from voxel index to world coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrid {
    pub origin: Vector3<f64>,
    pub spacing: f64,
}

impl VoxelGrid {
    pub fn new(origin: Vector3<f64>, spacing: f64) -> Self {
        Self { origin, spacing }
    }

    /// Homogeneous world position of voxel `(x, y, z)`.
    #[inline]
    pub fn world(&self, x: usize, y: usize, z: usize) -> Vector4<f64> {
        Vector4::new(
            self.origin.x + x as f64 * self.spacing,
            self.origin.y + y as f64 * self.spacing,
            self.origin.z + z as f64 * self.spacing,
            1.0,
        )
    }
}

/// Image coordinates of a world point under projection `m`.
#[inline]
pub fn project(m: &Matrix4<f64>, world: &Vector4<f64>) -> (f64, f64) {
    let p = m * world;
    (p.x, p.y)
}
