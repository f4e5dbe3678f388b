#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::assert::Assert;
use assert_cmd::Command;
use nalgebra::Matrix4;
use ndarray::Array3;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use tomo_recon::ctf::{Ctf, CtfParams, Optics};

const BIN_NAME: &str = "reconstruct_tomogram";

pub const PIXEL_SIZE: f64 = 2.0;

pub fn cmd() -> Command {
    Command::cargo_bin(BIN_NAME).unwrap()
}

pub trait AssertExt {
    fn print_stderr(self) -> Self;
}

impl AssertExt for Assert {
    fn print_stderr(self) -> Self {
        println!("STDERR:\n{}", String::from_utf8_lossy(&self.get_output().stderr));
        self
    }
}

/// Reproducible stack of uniform noise in `[-1, 1)`.
pub fn random_stack(shape: (usize, usize, usize), seed: u64) -> Array3<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::random_using(shape, Uniform::new(-1.0f32, 1.0), &mut rng)
}

pub fn optics() -> Optics {
    Optics {
        pixel_size: PIXEL_SIZE,
        voltage: 300.0,
        cs: 2.7,
        amplitude_contrast: 0.07,
    }
}

pub fn ctf_params(defocus: f64) -> CtfParams {
    CtfParams {
        defocus_u: defocus,
        defocus_v: defocus * 0.98,
        defocus_angle: 20.0,
        phase_shift: 0.0,
        b_factor: 0.0,
        scale: 1.0,
    }
}

pub fn ctfs(frames: usize) -> Vec<Ctf> {
    (0..frames)
        .map(|f| Ctf::new(&optics(), &ctf_params(20000.0 + 500.0 * f as f64)).unwrap())
        .collect()
}

/// Identity projection shifted by `shift` pixels along x.
pub fn shifted(shift: f64) -> Matrix4<f64> {
    let mut m = Matrix4::identity();
    m[(0, 3)] = shift;
    m
}

/// Rotation about the y axis by `deg`, keeping the centre of a
/// `size × size × size` tomogram fixed.
pub fn tilt(deg: f64, size: f64) -> Matrix4<f64> {
    let (s, c) = deg.to_radians().sin_cos();
    let half = size / 2.0;
    Matrix4::new(
        c, 0.0, s, half - c * half - s * half, //
        0.0, 1.0, 0.0, 0.0, //
        -s, 0.0, c, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Write a one-tomogram set next to an `.npy` stack and return the set path.
pub fn write_set(
    dir: &Path,
    stack: &Array3<f32>,
    projections: &[Matrix4<f64>],
    depth: usize,
) -> PathBuf {
    let (_, height, width) = stack.dim();
    ndarray_npy::write_npy(dir.join("ts.npy"), stack).unwrap();

    let frames: Vec<_> = projections
        .iter()
        .enumerate()
        .map(|(f, m)| {
            let rows: Vec<Vec<f64>> = (0..4).map(|r| (0..4).map(|c| m[(r, c)]).collect()).collect();
            let params = ctf_params(20000.0 + 500.0 * f as f64);
            json!({
                "projection": rows,
                "defocus_u": params.defocus_u,
                "defocus_v": params.defocus_v,
                "defocus_angle": params.defocus_angle,
            })
        })
        .collect();

    let set = json!({
        "tomograms": [ {
            "name": "TS_test",
            "stack": "ts.npy",
            "width": width,
            "height": height,
            "depth": depth,
            "optics": optics(),
            "frames": frames,
        } ]
    });

    let path = dir.join("tomograms.json");
    std::fs::write(&path, serde_json::to_string_pretty(&set).unwrap()).unwrap();
    path
}
