//! Stack-level preprocessing: DC removal and Fourier resampling.

use ndarray::parallel::prelude::*;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use rustfft::num_complex::Complex32;
use tracing::info;

use crate::error::Result;
use crate::fourier::{frequency_index, half_width, wrapped_frequency, Fft2};
use crate::geometry::round_half_up;
use crate::parallel::Workers;

/// Subtract each frame's mean, zeroing its zero-frequency component.
pub fn zero_dc(stack: &mut Array3<f32>, workers: &Workers) {
    workers.install(|| {
        stack.axis_iter_mut(Axis(0)).into_par_iter().for_each(|mut frame| {
            let n = frame.len().max(1) as f64;
            let mean = (frame.iter().map(|&v| v as f64).sum::<f64>() / n) as f32;
            frame.mapv_inplace(|v| v - mean);
        });
    });
}

/// Frame size after resampling a `w × h` frame by `ratio`.
pub fn resampled_dim(width: usize, height: usize, ratio: f64) -> (usize, usize) {
    (
        round_half_up(width as f64 / ratio).max(1),
        round_half_up(height as f64 / ratio).max(1),
    )
}

/// Resample every frame by `ratio` (> 1 shrinks) through its spectrum.
///
/// Frequencies beyond the new Nyquist limit are dropped, which low-pass
/// filters before decimating; the mean intensity is preserved. Frames are
/// independent and processed on `workers`.
pub fn resample_stack(stack: &Array3<f32>, ratio: f64, workers: &Workers) -> Result<Array3<f32>> {
    let (frames, height, width) = stack.dim();
    let (new_width, new_height) = resampled_dim(width, height, ratio);

    info!(
        ratio,
        from = %format!("{}x{}", width, height),
        to = %format!("{}x{}", new_width, new_height),
        "resampling image stack"
    );

    let source = Fft2::new(width, height);
    let target = Fft2::new(new_width, new_height);
    let mut out = Array3::<f32>::zeros((frames, new_height, new_width));

    workers.install(|| {
        stack
            .axis_iter(Axis(0))
            .into_par_iter()
            .zip(out.axis_iter_mut(Axis(0)))
            .try_for_each(|(frame, mut dst)| -> Result<()> {
                dst.assign(&resample_frame(frame, &source, &target)?);
                Ok(())
            })
    })?;

    Ok(out)
}

fn resample_frame(frame: ArrayView2<f32>, source: &Fft2, target: &Fft2) -> Result<Array2<f32>> {
    let (height, width) = source.dim();
    let (new_height, new_width) = target.dim();
    let spectrum = source.forward(frame)?;

    // unnormalized forward, normalized inverse: rescale to keep the mean
    let scale = (new_width * new_height) as f32 / (width * height) as f32;
    let max_col = half_width(width);

    let rows: Vec<Vec<(usize, f32)>> = (0..new_height)
        .map(|y| source_rows(y, new_height, height))
        .collect();

    let cropped = Array2::from_shape_fn(target.spectrum_dim(), |(y, x)| {
        if x >= max_col {
            return Complex32::default();
        }
        rows[y]
            .iter()
            .map(|&(row, weight)| spectrum[(row, x)] * (weight * scale))
            .sum()
    });

    target.inverse(cropped)
}

/// Source rows, with weights, feeding row `y` of the resampled spectrum.
///
/// On an even axis the Nyquist row stands for both `+n/2` and `-n/2`: a
/// cropped Nyquist row averages the two source rows, a padded one receives
/// half of the source Nyquist row on each side.
fn source_rows(y: usize, new_height: usize, height: usize) -> Vec<(usize, f32)> {
    let k = wrapped_frequency(y, new_height);
    let (half, new_half) = ((height / 2) as i64, (new_height / 2) as i64);

    if new_height < height && new_height % 2 == 0 && k == -new_half {
        let rows: Vec<usize> = [-new_half, new_half]
            .iter()
            .filter_map(|&k| frequency_index(k, height))
            .collect();
        let weight = 1.0 / rows.len().max(1) as f32;
        return rows.into_iter().map(|row| (row, weight)).collect();
    }
    if new_height > height && height % 2 == 0 && k.abs() == half {
        return frequency_index(-half, height).map(|row| (row, 0.5)).into_iter().collect();
    }
    frequency_index(k, height).map(|row| (row, 1.0)).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use std::f32::consts::PI;

    #[test]
    fn zero_dc_removes_frame_means() {
        let workers = Workers::new(2).unwrap();
        let mut stack = Array3::random((4, 10, 12), Uniform::new(3.0f32, 5.0));
        zero_dc(&mut stack, &workers);
        for frame in stack.outer_iter() {
            assert_abs_diff_eq!(frame.mean().unwrap(), 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn downsampling_halves_frames_and_keeps_count() {
        let workers = Workers::new(2).unwrap();
        let stack = Array3::random((5, 64, 48), Uniform::new(-1.0f32, 1.0));
        let out = resample_stack(&stack, 2.0, &workers).unwrap();
        assert_eq!(out.dim(), (5, 32, 24));
    }

    #[test]
    fn constant_frames_stay_constant() {
        let workers = Workers::new(1).unwrap();
        let stack = Array3::from_elem((2, 40, 40), 2.5f32);
        let out = resample_stack(&stack, 4.0, &workers).unwrap();
        assert_eq!(out.dim(), (2, 10, 10));
        for v in out.iter() {
            assert_abs_diff_eq!(*v, 2.5, epsilon = 1e-5);
        }
    }

    #[test]
    fn low_frequencies_survive_high_frequencies_are_removed() {
        let workers = Workers::new(1).unwrap();
        let (w, h) = (64, 64);
        // 2 cycles survive a 4x decimation, 24 cycles lie past the new Nyquist
        let stack = Array3::from_shape_fn((1, h, w), |(_, y, x)| {
            let low = (2.0 * PI * 2.0 * x as f32 / w as f32).cos();
            let high = (2.0 * PI * 24.0 * y as f32 / h as f32).cos();
            low + high
        });
        let out = resample_stack(&stack, 4.0, &workers).unwrap();
        assert_eq!(out.dim(), (1, 16, 16));
        for ((_, _, x), v) in out.indexed_iter() {
            let expected = (2.0 * PI * 2.0 * x as f32 / 16.0).cos();
            assert_abs_diff_eq!(*v, expected, epsilon = 1e-4);
        }
    }

    #[test]
    fn nyquist_row_treats_both_signs_alike() {
        let workers = Workers::new(1).unwrap();
        let (w, h) = (16, 16);
        // 4 cycles along y become the Nyquist row once the frame is halved
        let wave = |sign: f32| {
            Array3::from_shape_fn((1, h, w), move |(_, y, x)| {
                (2.0 * PI * (x as f32 / w as f32 + sign * 4.0 * y as f32 / h as f32)).cos()
            })
        };
        let up = resample_stack(&wave(1.0), 2.0, &workers).unwrap();
        let down = resample_stack(&wave(-1.0), 2.0, &workers).unwrap();
        assert_eq!(up.dim(), (1, 8, 8));

        for (((_, y, x), a), b) in up.indexed_iter().zip(down.iter()) {
            let alternating = if y % 2 == 0 { 1.0 } else { -1.0 };
            let expected = 0.5 * alternating * (2.0 * PI * x as f32 / 8.0).cos();
            assert_abs_diff_eq!(*a, expected, epsilon = 1e-4);
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
        }
    }

    #[test]
    fn source_rows_split_and_merge_nyquist() {
        // cropping 16 -> 8: row 4 (-4) averages source rows 12 (-4) and 4 (+4)
        assert_eq!(source_rows(4, 8, 16), vec![(12, 0.5), (4, 0.5)]);
        assert_eq!(source_rows(3, 8, 16), vec![(3, 1.0)]);
        assert_eq!(source_rows(7, 8, 16), vec![(15, 1.0)]);
        // padding 8 -> 16: the source Nyquist row 4 is shared by rows 4 and 12
        assert_eq!(source_rows(4, 16, 8), vec![(4, 0.5)]);
        assert_eq!(source_rows(12, 16, 8), vec![(4, 0.5)]);
        assert_eq!(source_rows(6, 16, 8), vec![]);
    }

    #[test]
    fn upsampling_interpolates_band_limited_frames() {
        let workers = Workers::new(1).unwrap();
        let stack = Array3::from_shape_fn((1, 8, 8), |(_, _, x)| (2.0 * PI * x as f32 / 8.0).sin());
        let out = resample_stack(&stack, 0.5, &workers).unwrap();
        assert_eq!(out.dim(), (1, 16, 16));
        for ((_, _, x), v) in out.indexed_iter() {
            assert_abs_diff_eq!(*v, (2.0 * PI * x as f32 / 16.0).sin(), epsilon = 1e-4);
        }
    }
}
