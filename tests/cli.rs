mod util;

use ndarray::Array3;
use predicates::prelude::*;

use tomo_recon::mrc::read_volume;

use crate::util::{cmd, shifted, write_set, AssertExt, PIXEL_SIZE};

#[test]
fn exclusive_weighting_fails_before_reading_anything() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mrc");

    cmd()
        .arg("--tomograms")
        .arg(dir.path().join("missing.json"))
        .arg("--weight-3d")
        .arg("--weight-2d")
        .arg("--output")
        .arg(&output)
        .assert()
        .print_stderr()
        .failure()
        .stderr(predicate::str::contains("mutually exclusive"))
        .stderr(predicate::str::contains("missing.json").not());

    assert!(!output.exists());
}

#[test]
fn missing_tomogram_set_is_reported() {
    let dir = tempfile::tempdir().unwrap();

    cmd()
        .arg("--tomograms")
        .arg(dir.path().join("missing.json"))
        .arg("--output")
        .arg(dir.path().join("out.mrc"))
        .assert()
        .print_stderr()
        .failure()
        .stderr(predicate::str::contains("Failed to load tomogram set"));
}

#[test]
fn writes_volume_with_sampling_rate() {
    let dir = tempfile::tempdir().unwrap();
    let stack = Array3::from_elem((2, 32, 32), 3.0f32);
    let set_path = write_set(dir.path(), &stack, &[shifted(0.0), shifted(1.0)], 16);
    let output = dir.path().join("out.mrc");

    cmd()
        .arg("--tomograms")
        .arg(&set_path)
        .args(["--no-ctf", "--bin", "2", "-j", "2", "--thickness", "8"])
        .args(["--x0", "0", "--y0", "0", "--z0", "0"])
        .arg("--output")
        .arg(&output)
        .assert()
        .print_stderr()
        .success();

    let volume = read_volume(&output).unwrap();
    assert_eq!(volume.data.dim(), (4, 16, 16));
    assert!((volume.pixel_size - PIXEL_SIZE * 2.0).abs() < 1e-5);
    // an interior voxel sees both frames of the flat stack
    assert!((volume.data[(2, 8, 8)] - 3.0).abs() < 1e-4);
}
