//! CTF modulation of a tilt stack and the matching point-spread stack.

use ndarray::parallel::prelude::*;
use ndarray::{Array2, Array3, ArrayViewMut2, Axis};
use rustfft::num_complex::Complex32;
use tracing::debug;

use crate::ctf::TransferFunction;
use crate::error::{ReconError, Result};
use crate::fourier::{half_width, wrapped_frequency, Fft2};
use crate::geometry::round_half_up;
use crate::parallel::Workers;

/// CTF coefficients over the half spectrum of a `w × h` frame with pixel
/// size `pixel_size` (Å).
pub fn ctf_image<T: TransferFunction + ?Sized>(
    ctf: &T,
    width: usize,
    height: usize,
    pixel_size: f64,
) -> Array2<f32> {
    let box_x = pixel_size * width as f64;
    let box_y = pixel_size * height as f64;

    Array2::from_shape_fn((height, half_width(width)), |(y, x)| {
        let xa = x as f64 / box_x;
        let ya = wrapped_frequency(y, height) as f64 / box_y;
        ctf.value(xa, ya) as f32
    })
}

/// Pixel `(row, column)` nearest to image point `(x, y)`, clamped to a
/// `w × h` frame.
pub fn anchor_pixel(x: f64, y: f64, width: usize, height: usize) -> (usize, usize) {
    let clamp = |v: f64, n: usize| {
        if v.is_finite() {
            round_half_up(v).min(n.saturating_sub(1))
        } else {
            n / 2
        }
    };
    (clamp(y, height), clamp(x, width))
}

/// Modulate every frame of `stack` in place with its CTF and return the
/// point-spread stack.
///
/// Frame `f` of the returned stack is the inverse transform of `ctf_f²`,
/// shifted so that its zero-offset sample sits at the pixel nearest to
/// `anchors[f]` (image `x, y`). Pass the projection of the reconstructed
/// region's centre so the backprojected PSF crosses that region. Frames are
/// processed independently on `workers`.
pub fn modulate_stack<T>(
    stack: &mut Array3<f32>,
    ctfs: &[T],
    anchors: &[(f64, f64)],
    pixel_size: f64,
    workers: &Workers,
) -> Result<Array3<f32>>
where
    T: TransferFunction + Sync,
{
    let (frames, height, width) = stack.dim();
    if ctfs.len() != frames {
        return Err(ReconError::FrameCountMismatch {
            what: "CTF records",
            expected: frames,
            got: ctfs.len(),
        });
    }
    if anchors.len() != frames {
        return Err(ReconError::FrameCountMismatch {
            what: "PSF anchors",
            expected: frames,
            got: anchors.len(),
        });
    }

    debug!(frames, width, height, pixel_size, "modulating stack with CTF");

    let fft = Fft2::new(width, height);
    let mut psf = Array3::<f32>::zeros((frames, height, width));

    workers.install(|| {
        stack
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(psf.axis_iter_mut(Axis(0)))
            .zip(ctfs.par_iter())
            .zip(anchors.par_iter())
            .try_for_each(|(((frame, psf_frame), ctf), &(x, y))| {
                let anchor = anchor_pixel(x, y, width, height);
                modulate_frame(frame, psf_frame, ctf, pixel_size, &fft, anchor)
            })
    })?;

    Ok(psf)
}

/// Modulate one frame and write its point-spread frame, centred on pixel
/// `anchor = (row, column)`.
pub fn modulate_frame<T: TransferFunction + ?Sized>(
    mut frame: ArrayViewMut2<f32>,
    mut psf: ArrayViewMut2<f32>,
    ctf: &T,
    pixel_size: f64,
    fft: &Fft2,
    anchor: (usize, usize),
) -> Result<()> {
    let (height, width) = frame.dim();
    let coefficients = ctf_image(ctf, width, height, pixel_size);

    let mut spectrum = fft.forward(frame.view())?;
    spectrum.zip_mut_with(&coefficients, |s, &c| *s *= c);
    let squared = coefficients.mapv(|c| Complex32::new(c * c, 0.0));

    frame.assign(&fft.inverse(spectrum)?);

    let kernel = fft.inverse(squared)?;
    let (cy, cx) = anchor;
    for ((y, x), &v) in kernel.indexed_iter() {
        psf[((y + cy) % height, (x + cx) % width)] = v;
    }
    Ok(())
}
