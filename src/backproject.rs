//! Real-space backprojection into a voxel grid.
//!
//! Every voxel is mapped through each frame's projection matrix and the
//! frame is sampled at the resulting image position. Samples that fall
//! outside a frame contribute nothing. The accumulated, taper-weighted sum
//! is divided by the number of frames that did contribute.
//!
//! The volume is split into z-slabs; each worker writes only the slabs it
//! was handed, and the stack and matrices are shared read-only.

use nalgebra::{Matrix4, Vector4};
use ndarray::parallel::prelude::*;
use ndarray::{Array3, ArrayView2, ArrayViewMut2, Axis};
use tracing::debug;

use crate::error::{ReconError, Result};
use crate::geometry::{project, VoxelGrid};
use crate::parallel::Workers;

/// Taper radii at or below this disable tapering.
const MIN_TAPER: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
}

/// Sample `frame` at `(x, y)`, or `None` if the stencil leaves the frame.
#[inline]
pub fn sample(frame: &ArrayView2<f32>, x: f64, y: f64, interpolation: Interpolation) -> Option<f32> {
    let (h, w) = frame.dim();
    if !(x >= 0.0 && y >= 0.0 && x <= (w - 1) as f64 && y <= (h - 1) as f64) {
        return None;
    }

    match interpolation {
        Interpolation::Nearest => {
            let xi = (x + 0.5).floor() as usize;
            let yi = (y + 0.5).floor() as usize;
            Some(frame[(yi.min(h - 1), xi.min(w - 1))])
        }
        Interpolation::Linear => {
            let x0 = x.floor() as usize;
            let y0 = y.floor() as usize;
            // at the last row/column the far neighbour has zero weight
            let x1 = (x0 + 1).min(w - 1);
            let y1 = (y0 + 1).min(h - 1);
            let fx = (x - x0 as f64) as f32;
            let fy = (y - y0 as f64) as f32;

            let top = (1.0 - fx) * frame[(y0, x0)] + fx * frame[(y0, x1)];
            let bottom = (1.0 - fx) * frame[(y1, x0)] + fx * frame[(y1, x1)];
            Some((1.0 - fy) * top + fy * bottom)
        }
    }
}

/// Edge taper for an in-frame position: 0 on the frame border, rising
/// linearly to 1 at `radius` pixels inside.
#[inline]
pub fn taper_weight(x: f64, y: f64, width: usize, height: usize, radius: f64) -> f64 {
    if radius <= MIN_TAPER {
        return 1.0;
    }
    let edge = x
        .min(y)
        .min((width - 1) as f64 - x)
        .min((height - 1) as f64 - y);
    (edge / radius).clamp(0.0, 1.0)
}

/// Backproject `stack` into `volume`.
///
/// - `stack`: `(frame, y, x)` working images
/// - `projections`: one matrix per frame, world to working-pixel coordinates
/// - `volume`: `(z, y, x)` output, overwritten
/// - `grid`: voxel origin and spacing in world units
/// - `taper`: edge falloff in image pixels, `0` for none
pub fn backproject(
    stack: &Array3<f32>,
    projections: &[Matrix4<f64>],
    volume: &mut Array3<f32>,
    workers: &Workers,
    grid: &VoxelGrid,
    interpolation: Interpolation,
    taper: f64,
) -> Result<()> {
    let (frames, height, width) = stack.dim();
    check_frames(frames, projections)?;
    if frames == 0 || height == 0 || width == 0 {
        volume.fill(0.0);
        return Ok(());
    }

    debug!(frames, volume = ?volume.dim(), threads = workers.threads(), "backprojecting");

    let views: Vec<ArrayView2<f32>> = stack.outer_iter().collect();

    accumulate(volume, workers, |slab, z| {
        fill_slab(slab, z, grid, |world, (sum, count)| {
            for (frame, m) in views.iter().zip(projections) {
                let (x, y) = project(m, world);
                if let Some(v) = sample(frame, x, y, interpolation) {
                    let t = taper_weight(x, y, width, height, taper) as f32;
                    *sum += t * v;
                    *count += 1;
                }
            }
        })
    });

    Ok(())
}

/// Backproject a synthetic unit response instead of the stack.
///
/// Each frame holds a unit impulse at the projection of the volume centre,
/// sampled with the bilinear kernel; `stack` only supplies the frame size.
pub fn backproject_psf(
    stack: &Array3<f32>,
    projections: &[Matrix4<f64>],
    volume: &mut Array3<f32>,
    workers: &Workers,
    grid: &VoxelGrid,
) -> Result<()> {
    let (frames, height, width) = stack.dim();
    check_frames(frames, projections)?;
    if frames == 0 || height == 0 || width == 0 {
        volume.fill(0.0);
        return Ok(());
    }

    let centres = projected_centres(projections, grid, volume.dim());

    debug!(frames, volume = ?volume.dim(), "backprojecting unit response");

    let in_frame = |x: f64, y: f64| {
        x >= 0.0 && y >= 0.0 && x <= (width - 1) as f64 && y <= (height - 1) as f64
    };

    accumulate(volume, workers, |slab, z| {
        fill_slab(slab, z, grid, |world, (sum, count)| {
            for (m, &(cx, cy)) in projections.iter().zip(&centres) {
                let (x, y) = project(m, world);
                if !in_frame(x, y) {
                    continue;
                }
                let kx = (1.0 - (x - cx).abs()).max(0.0);
                let ky = (1.0 - (y - cy).abs()).max(0.0);
                *sum += (kx * ky) as f32;
                *count += 1;
            }
        })
    });

    Ok(())
}

/// Image position of the centre voxel of a `(z, y, x)` volume in every frame.
pub fn projected_centres(
    projections: &[Matrix4<f64>],
    grid: &VoxelGrid,
    shape: (usize, usize, usize),
) -> Vec<(f64, f64)> {
    let (depth, height, width) = shape;
    let centre = grid.world(width / 2, height / 2, depth / 2);
    projections.iter().map(|m| project(m, &centre)).collect()
}

fn check_frames(frames: usize, projections: &[Matrix4<f64>]) -> Result<()> {
    if projections.len() != frames {
        return Err(ReconError::FrameCountMismatch {
            what: "projection matrices",
            expected: frames,
            got: projections.len(),
        });
    }
    Ok(())
}

/// Hand each z-slab of `volume` to exactly one task.
fn accumulate<F>(volume: &mut Array3<f32>, workers: &Workers, per_slab: F)
where
    F: Fn(ArrayViewMut2<f32>, usize) + Sync + Send,
{
    workers.install(|| {
        volume
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(z, slab)| per_slab(slab, z));
    });
}

/// Fill one slab, voxel by voxel, from a per-voxel accumulator.
fn fill_slab<F>(mut slab: ArrayViewMut2<f32>, z: usize, grid: &VoxelGrid, gather: F)
where
    F: Fn(&Vector4<f64>, (&mut f32, &mut u32)),
{
    for ((y, x), voxel) in slab.indexed_iter_mut() {
        let world = grid.world(x, y, z);
        let mut sum = 0.0f32;
        let mut count = 0u32;
        gather(&world, (&mut sum, &mut count));
        *voxel = if count > 0 { sum / count as f32 } else { 0.0 };
    }
}
