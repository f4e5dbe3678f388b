//! 2D pre-weighting of tilt images before backprojection.
//!
//! Every frame samples a central slab of the 3D spectrum. Near the origin
//! all slabs overlap and low-tilt directions are sampled many times over, so
//! each 2D frequency is divided by the number of frames whose slab covers
//! the corresponding 3D frequency (times the frame count, which keeps the
//! DC term unchanged).

use nalgebra::{Matrix4, Vector3};
use ndarray::parallel::prelude::*;
use ndarray::{Array2, Array3, Axis};
use tracing::debug;

use crate::error::{ReconError, Result};
use crate::fourier::{half_width, wrapped_frequency, Fft2};
use crate::parallel::Workers;

/// Orientation of one frame's central slab in 3D Fourier space.
#[derive(Debug, Clone, Copy)]
struct Slab {
    u: Vector3<f64>,
    v: Vector3<f64>,
    normal: Option<Vector3<f64>>,
}

impl Slab {
    fn from_projection(m: &Matrix4<f64>) -> Self {
        let r0 = Vector3::new(m[(0, 0)], m[(0, 1)], m[(0, 2)]);
        let r1 = Vector3::new(m[(1, 0)], m[(1, 1)], m[(1, 2)]);
        Self {
            u: r0.try_normalize(1e-12).unwrap_or_else(Vector3::zeros),
            v: r1.try_normalize(1e-12).unwrap_or_else(Vector3::zeros),
            normal: r0.cross(&r1).try_normalize(1e-12),
        }
    }
}

/// Weights over the half spectrum of frame `frame` of a `w × h` stack.
fn frame_weights(slabs: &[Slab], frame: usize, width: usize, height: usize) -> Array2<f32> {
    let own = slabs[frame];
    let count = slabs.len() as f64;
    // slab thickness is one Fourier pixel of the larger frame edge
    let extent = width.max(height) as f64;

    Array2::from_shape_fn((height, half_width(width)), |(y, x)| {
        let kx = x as f64 / width as f64;
        let ky = wrapped_frequency(y, height) as f64 / height as f64;
        let k = (own.u * kx + own.v * ky) * extent;

        let overlap: f64 = slabs
            .iter()
            .enumerate()
            .map(|(g, slab)| {
                if g == frame {
                    return 1.0;
                }
                match slab.normal {
                    Some(n) => (1.0 - n.dot(&k).abs()).max(0.0),
                    None => 0.0,
                }
            })
            .sum();

        (count / overlap) as f32
    })
}

/// Apply the 2D pre-weighting to every frame of `stack`.
pub fn pre_weight(
    stack: &Array3<f32>,
    projections: &[Matrix4<f64>],
    workers: &Workers,
) -> Result<Array3<f32>> {
    let (frames, height, width) = stack.dim();
    if projections.len() != frames {
        return Err(ReconError::FrameCountMismatch {
            what: "projection matrices",
            expected: frames,
            got: projections.len(),
        });
    }

    debug!(frames, "pre-weighting stack");

    let slabs: Vec<Slab> = projections.iter().map(Slab::from_projection).collect();
    let fft = Fft2::new(width, height);
    let mut out = Array3::<f32>::zeros((frames, height, width));

    workers.install(|| {
        stack
            .axis_iter(Axis(0))
            .into_par_iter()
            .zip(out.axis_iter_mut(Axis(0)))
            .enumerate()
            .try_for_each(|(f, (frame, mut dst))| -> Result<()> {
                let weights = frame_weights(&slabs, f, width, height);
                let mut spectrum = fft.forward(frame)?;
                spectrum.zip_mut_with(&weights, |s, &w| *s *= w);
                dst.assign(&fft.inverse(spectrum)?);
                Ok(())
            })
    })?;

    Ok(out)
}
