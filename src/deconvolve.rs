//! Wiener-style 3D deconvolution of a backprojected volume.

use ndarray::Array3;
use tracing::debug;

use crate::error::{ReconError, Result};
use crate::fourier::{zip_bins_mut, Fft3};
use crate::parallel::Workers;

/// Divide the spectrum of `data` by `|PSF| + regularization`, in place.
///
/// `regularization` is the assumed inverse SNR. The PSF enters through the
/// magnitude of its spectrum, so where the PSF volume is centred does not
/// matter; frequencies the PSF barely reaches are damped by the
/// regularization instead of blowing up.
pub fn correct_3d_rs(
    data: &mut Array3<f32>,
    psf: &Array3<f32>,
    regularization: f64,
    workers: &Workers,
) -> Result<()> {
    if data.dim() != psf.dim() {
        let (a, b) = (data.dim(), psf.dim());
        return Err(ReconError::ShapeMismatch {
            what: "PSF volume",
            expected: vec![a.0, a.1, a.2],
            got: vec![b.0, b.1, b.2],
        });
    }
    if !(regularization > 0.0 && regularization.is_finite()) {
        return Err(ReconError::InvalidConfig(format!(
            "Wiener regularization must be positive, got {}",
            regularization
        )));
    }

    let (d, h, w) = data.dim();
    debug!(regularization, volume = ?(d, h, w), "deconvolving volume");

    let offset = regularization as f32;
    let fft = Fft3::new(d, h, w);

    let corrected = workers.install(|| -> Result<Array3<f32>> {
        let mut data_fs = fft.forward(data)?;
        let psf_fs = fft.forward(psf)?;
        zip_bins_mut(&mut data_fs, &psf_fs, |v, p| *v /= p.norm() + offset);
        fft.inverse(data_fs)
    })?;

    *data = corrected;
    Ok(())
}
