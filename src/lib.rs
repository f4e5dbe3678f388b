//! Weighted real-space backprojection of cryo-ET tilt series.
//!
//! A run takes one tomogram (image stack, projection matrices and per-frame
//! CTFs), optionally bins it, modulates it with its CTF, weights it in 2D or
//! 3D, backprojects it into a voxel grid and deconvolves the result with the
//! backprojected point-spread function. Every stage runs on one shared
//! [`Workers`] pool.

pub mod backproject;
pub mod ctf;
pub mod deconvolve;
pub mod error;
pub mod fourier;
pub mod geometry;
pub mod logging;
pub mod modulate;
pub mod mrc;
pub mod parallel;
pub mod pipeline;
pub mod preweight;
pub mod resample;
pub mod tomogram;

pub use backproject::Interpolation;
pub use error::{ReconError, Result};
pub use mrc::write_volume;
pub use parallel::Workers;
pub use pipeline::{reconstruct, ReconConfig, Reconstruction, Weighting};
pub use tomogram::{Tomogram, TomogramSet};
