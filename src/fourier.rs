//! Real-to-complex Fourier transforms over 2D frames and 3D volumes.
//!
//! Layout follows the usual half-spectrum convention: only the
//! non-negative frequency columns `0..=w/2` along x are stored, and along
//! every other axis index `i` holds frequency `i` for `i < n/2` and `i - n`
//! otherwise. The forward transform is unnormalized, the inverse divides by
//! the number of samples, so `inverse(forward(a)) == a`.

use std::sync::Arc;

use ndarray::parallel::prelude::*;
use ndarray::{Array2, Array3, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, Zip};
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::error::{ReconError, Result};

/// Signed frequency held at index `i` of an axis of length `n`.
#[inline]
pub fn wrapped_frequency(i: usize, n: usize) -> i64 {
    if i < n / 2 {
        i as i64
    } else {
        i as i64 - n as i64
    }
}

/// Index holding signed frequency `k` on an axis of length `n`, if that
/// frequency is represented there.
#[inline]
pub fn frequency_index(k: i64, n: usize) -> Option<usize> {
    let n = n as i64;
    if k >= -(n - n / 2) && k < n / 2 {
        Some(k.rem_euclid(n) as usize)
    } else {
        None
    }
}

/// Number of stored columns for a real axis of length `w`.
#[inline]
pub fn half_width(w: usize) -> usize {
    w / 2 + 1
}

/// 2D transform plans for frames of a fixed size.
///
/// Plans are shared; every call allocates its own work buffers, so one
/// `Fft2` can serve all frames of a parallel loop.
pub struct Fft2 {
    width: usize,
    height: usize,
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
    y_forward: Arc<dyn Fft<f32>>,
    y_inverse: Arc<dyn Fft<f32>>,
}

impl Fft2 {
    pub fn new(width: usize, height: usize) -> Self {
        let mut real = RealFftPlanner::<f32>::new();
        let mut complex = FftPlanner::<f32>::new();
        Self {
            width,
            height,
            r2c: real.plan_fft_forward(width),
            c2r: real.plan_fft_inverse(width),
            y_forward: complex.plan_fft_forward(height),
            y_inverse: complex.plan_fft_inverse(height),
        }
    }

    /// Frame shape, `(h, w)`.
    pub fn dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Spectrum shape, `(h, w/2 + 1)`.
    pub fn spectrum_dim(&self) -> (usize, usize) {
        (self.height, half_width(self.width))
    }

    pub fn forward(&self, image: ArrayView2<f32>) -> Result<Array2<Complex32>> {
        check_dim("frame", &[self.height, self.width], image.shape())?;

        let mut spectrum = Array2::<Complex32>::zeros(self.spectrum_dim());
        rows_forward(&*self.r2c, image, spectrum.view_mut())?;
        transform_lanes(spectrum.view_mut(), Axis(0), &*self.y_forward);
        Ok(spectrum)
    }

    pub fn inverse(&self, mut spectrum: Array2<Complex32>) -> Result<Array2<f32>> {
        check_dim("spectrum", &[self.height, half_width(self.width)], spectrum.shape())?;

        transform_lanes(spectrum.view_mut(), Axis(0), &*self.y_inverse);
        let mut image = Array2::<f32>::zeros((self.height, self.width));
        rows_inverse(&*self.c2r, spectrum.view_mut(), image.view_mut())?;

        let norm = 1.0 / (self.width * self.height) as f32;
        image.mapv_inplace(|v| v * norm);
        Ok(image)
    }
}

/// 3D transform plans for volumes of a fixed `(d, h, w)` shape.
///
/// Both directions parallelize over slabs on the current rayon pool; each
/// worker owns the slabs it transforms.
pub struct Fft3 {
    depth: usize,
    height: usize,
    width: usize,
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
    y_forward: Arc<dyn Fft<f32>>,
    y_inverse: Arc<dyn Fft<f32>>,
    z_forward: Arc<dyn Fft<f32>>,
    z_inverse: Arc<dyn Fft<f32>>,
}

impl Fft3 {
    pub fn new(depth: usize, height: usize, width: usize) -> Self {
        let mut real = RealFftPlanner::<f32>::new();
        let mut complex = FftPlanner::<f32>::new();
        Self {
            depth,
            height,
            width,
            r2c: real.plan_fft_forward(width),
            c2r: real.plan_fft_inverse(width),
            y_forward: complex.plan_fft_forward(height),
            y_inverse: complex.plan_fft_inverse(height),
            z_forward: complex.plan_fft_forward(depth),
            z_inverse: complex.plan_fft_inverse(depth),
        }
    }

    pub fn spectrum_dim(&self) -> (usize, usize, usize) {
        (self.depth, self.height, half_width(self.width))
    }

    pub fn forward(&self, volume: &Array3<f32>) -> Result<Array3<Complex32>> {
        check_dim("volume", &[self.depth, self.height, self.width], volume.shape())?;

        let mut spectrum = Array3::<Complex32>::zeros(self.spectrum_dim());

        // x then y, one z-slab per task
        volume
            .axis_iter(Axis(0))
            .into_par_iter()
            .zip(spectrum.axis_iter_mut(Axis(0)))
            .try_for_each(|(src, mut dst)| -> Result<()> {
                rows_forward(&*self.r2c, src, dst.view_mut())?;
                transform_lanes(dst, Axis(0), &*self.y_forward);
                Ok(())
            })?;

        // z, one y-slab per task
        spectrum
            .axis_iter_mut(Axis(1))
            .into_par_iter()
            .for_each(|slab| transform_lanes(slab, Axis(0), &*self.z_forward));

        Ok(spectrum)
    }

    pub fn inverse(&self, mut spectrum: Array3<Complex32>) -> Result<Array3<f32>> {
        check_dim(
            "spectrum",
            &[self.depth, self.height, half_width(self.width)],
            spectrum.shape(),
        )?;

        spectrum
            .axis_iter_mut(Axis(1))
            .into_par_iter()
            .for_each(|slab| transform_lanes(slab, Axis(0), &*self.z_inverse));

        let mut volume = Array3::<f32>::zeros((self.depth, self.height, self.width));
        let norm = 1.0 / (self.depth * self.height * self.width) as f32;

        spectrum
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(volume.axis_iter_mut(Axis(0)))
            .try_for_each(|(mut src, mut dst)| -> Result<()> {
                transform_lanes(src.view_mut(), Axis(0), &*self.y_inverse);
                rows_inverse(&*self.c2r, src, dst.view_mut())?;
                dst.mapv_inplace(|v| v * norm);
                Ok(())
            })?;

        Ok(volume)
    }
}

/// Apply `f(spectrum_bin, other_bin)` over two equally shaped spectra in
/// parallel.
pub fn zip_bins_mut<F>(a: &mut Array3<Complex32>, b: &Array3<Complex32>, f: F)
where
    F: Fn(&mut Complex32, &Complex32) + Sync + Send,
{
    Zip::from(a).and(b).par_for_each(f);
}

fn check_dim(what: &'static str, expected: &[usize], got: &[usize]) -> Result<()> {
    if expected != got {
        return Err(ReconError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}

fn rows_forward(
    r2c: &dyn RealToComplex<f32>,
    image: ArrayView2<f32>,
    mut spectrum: ArrayViewMut2<Complex32>,
) -> Result<()> {
    let mut input = r2c.make_input_vec();
    let mut output = r2c.make_output_vec();

    for (src, mut dst) in image.outer_iter().zip(spectrum.outer_iter_mut()) {
        input.iter_mut().zip(src.iter()).for_each(|(a, b)| *a = *b);
        r2c.process(&mut input, &mut output)?;
        dst.iter_mut().zip(output.iter()).for_each(|(a, b)| *a = *b);
    }
    Ok(())
}

fn rows_inverse(
    c2r: &dyn ComplexToReal<f32>,
    mut spectrum: ArrayViewMut2<Complex32>,
    mut image: ArrayViewMut2<f32>,
) -> Result<()> {
    let mut input = c2r.make_input_vec();
    let mut output = c2r.make_output_vec();
    let even = output.len() % 2 == 0;

    for (src, mut dst) in spectrum.outer_iter_mut().zip(image.outer_iter_mut()) {
        input.iter_mut().zip(src.iter()).for_each(|(a, b)| *a = *b);

        // DC and Nyquist of a real signal are real
        input[0].im = 0.0;
        if even {
            if let Some(last) = input.last_mut() {
                last.im = 0.0;
            }
        }

        c2r.process(&mut input, &mut output)?;
        dst.iter_mut().zip(output.iter()).for_each(|(a, b)| *a = *b);
    }
    Ok(())
}

/// Transform every 1D lane along `axis` of a 2D view in place.
fn transform_lanes(mut data: ArrayViewMut2<Complex32>, axis: Axis, fft: &dyn Fft<f32>) {
    let mut buffer = vec![Complex32::default(); data.len_of(axis)];
    for lane in data.lanes_mut(axis) {
        transform_lane(lane, &mut buffer, fft);
    }
}

fn transform_lane(mut lane: ArrayViewMut1<Complex32>, buffer: &mut [Complex32], fft: &dyn Fft<f32>) {
    buffer.iter_mut().zip(lane.iter()).for_each(|(a, b)| *a = *b);
    fft.process(buffer);
    lane.iter_mut().zip(buffer.iter()).for_each(|(a, b)| *a = *b);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    #[test]
    fn wrapped_frequencies_follow_nyquist_convention() {
        let even: Vec<i64> = (0..6).map(|i| wrapped_frequency(i, 6)).collect();
        assert_eq!(even, vec![0, 1, 2, -3, -2, -1]);
        let odd: Vec<i64> = (0..5).map(|i| wrapped_frequency(i, 5)).collect();
        assert_eq!(odd, vec![0, 1, -3, -2, -1]);

        for n in [5usize, 6, 64] {
            for i in 0..n {
                assert_eq!(frequency_index(wrapped_frequency(i, n), n), Some(i));
            }
        }
        assert_eq!(frequency_index(3, 6), None);
        assert_eq!(frequency_index(-4, 6), None);
    }

    #[test]
    fn frame_round_trip() {
        for (w, h) in [(16, 12), (13, 17)] {
            let image = Array2::random((h, w), Uniform::new(-1.0f32, 1.0));
            let fft = Fft2::new(w, h);
            let spectrum = fft.forward(image.view()).unwrap();
            assert_eq!(spectrum.dim(), (h, w / 2 + 1));
            let back = fft.inverse(spectrum).unwrap();
            for (a, b) in image.iter().zip(back.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn frame_dc_is_the_sum() {
        let image = Array2::from_elem((8, 10), 0.5f32);
        let spectrum = Fft2::new(10, 8).forward(image.view()).unwrap();
        assert_abs_diff_eq!(spectrum[(0, 0)].re, 40.0, epsilon = 1e-4);
        let rest: f32 = spectrum.iter().skip(1).map(|c| c.norm()).sum();
        assert_abs_diff_eq!(rest, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn cosine_lands_in_wrapped_row() {
        // cos along y with frequency 3 on a 16-row frame: energy at rows 3 and 13
        let (w, h) = (8, 16);
        let image = Array2::from_shape_fn((h, w), |(y, _)| {
            (2.0 * std::f32::consts::PI * 3.0 * y as f32 / h as f32).cos()
        });
        let spectrum = Fft2::new(w, h).forward(image.view()).unwrap();
        assert_abs_diff_eq!(spectrum[(3, 0)].re, (w * h) as f32 / 2.0, epsilon = 1e-3);
        assert_abs_diff_eq!(spectrum[(13, 0)].re, (w * h) as f32 / 2.0, epsilon = 1e-3);
        assert_abs_diff_eq!(spectrum[(5, 0)].norm(), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn volume_round_trip() {
        let volume = Array3::random((6, 9, 10), Uniform::new(-1.0f32, 1.0));
        let fft = Fft3::new(6, 9, 10);
        let spectrum = fft.forward(&volume).unwrap();
        assert_eq!(spectrum.dim(), (6, 9, 6));
        let back = fft.inverse(spectrum).unwrap();
        for (a, b) in volume.iter().zip(back.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let mut volume = Array3::<f32>::zeros((4, 4, 4));
        volume[(0, 0, 0)] = 2.0;
        let spectrum = Fft3::new(4, 4, 4).forward(&volume).unwrap();
        for c in spectrum.iter() {
            assert_abs_diff_eq!(c.re, 2.0, epsilon = 1e-6);
            assert_abs_diff_eq!(c.im, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn shape_is_checked() {
        let fft = Fft2::new(8, 8);
        let err = fft.forward(Array2::<f32>::zeros((8, 9)).view()).unwrap_err();
        assert!(matches!(err, ReconError::ShapeMismatch { .. }));
    }
}
