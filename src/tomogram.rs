//! Tilt-series metadata and its on-disk tomogram set.
//!
//! A tomogram set is a JSON document:
//!
//! ```json
//! { "tomograms": [ {
//!     "name": "TS_01",
//!     "stack": "TS_01.mrc",
//!     "width": 4096, "height": 4096, "depth": 1200,
//!     "optics": { "pixel_size": 1.35, "voltage": 300.0, "cs": 2.7, "amplitude_contrast": 0.07 },
//!     "frames": [ { "projection": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
//!                   "defocus_u": 30000.0, "defocus_v": 29500.0, "defocus_angle": 12.0 } ]
//! } ] }
//! ```
//!
//! Stack paths are relative to the set file; `.npy` stacks are read with
//! `ndarray-npy`, everything else as MRC.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use nalgebra::Matrix4;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ctf::{Ctf, CtfParams, Optics};
use crate::error::{ReconError, Result};
use crate::mrc;

/// One tilt series, ready for reconstruction.
#[derive(Debug, Clone)]
pub struct Tomogram {
    pub name: String,
    /// `(frame, y, x)`
    pub stack: Array3<f32>,
    pub projections: Vec<Matrix4<f64>>,
    pub ctfs: Vec<Ctf>,
    /// Pixel size of the original (unbinned) frames, Å.
    pub pixel_size: f64,
    /// Original tomogram size in pixels `(w0, h0, d0)`.
    pub dims: (usize, usize, usize),
}

impl Tomogram {
    /// Assemble a tomogram, checking that every per-frame table agrees with
    /// the stack.
    pub fn new(
        name: impl Into<String>,
        stack: Array3<f32>,
        projections: Vec<Matrix4<f64>>,
        ctfs: Vec<Ctf>,
        pixel_size: f64,
        dims: (usize, usize, usize),
    ) -> Result<Self> {
        let frames = stack.dim().0;
        if projections.len() != frames {
            return Err(ReconError::FrameCountMismatch {
                what: "projection matrices",
                expected: frames,
                got: projections.len(),
            });
        }
        if ctfs.len() != frames {
            return Err(ReconError::FrameCountMismatch {
                what: "CTF records",
                expected: frames,
                got: ctfs.len(),
            });
        }
        if let Some(f) = projections.iter().position(|m| m.iter().any(|v| !v.is_finite())) {
            return Err(ReconError::InvalidMetadata(format!(
                "projection matrix of frame {} is not finite",
                f
            )));
        }
        if !(pixel_size > 0.0 && pixel_size.is_finite()) {
            return Err(ReconError::InvalidMetadata(format!(
                "pixel size must be positive, got {}",
                pixel_size
            )));
        }

        Ok(Self {
            name: name.into(),
            stack,
            projections,
            ctfs,
            pixel_size,
            dims,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.stack.dim().0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameEntry {
    /// Row-major world-to-image matrix.
    pub projection: [[f64; 4]; 4],
    #[serde(flatten)]
    pub ctf: CtfParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomogramEntry {
    pub name: String,
    pub stack: PathBuf,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub optics: Optics,
    pub frames: Vec<FrameEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomogramSet {
    pub tomograms: Vec<TomogramEntry>,
    #[serde(skip)]
    base: PathBuf,
}

impl TomogramSet {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ReconError::Io { path: path.to_path_buf(), source })?;
        let mut set: TomogramSet = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| ReconError::Json { path: path.to_path_buf(), source })?;
        set.base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.tomograms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tomograms.is_empty()
    }

    pub fn entry(&self, index: usize) -> Result<&TomogramEntry> {
        self.tomograms.get(index).ok_or(ReconError::TomogramIndex {
            index,
            count: self.tomograms.len(),
        })
    }

    /// Read the stack of tomogram `index` and assemble it.
    pub fn load_tomogram(&self, index: usize) -> Result<Tomogram> {
        let entry = self.entry(index)?;
        let stack_path = self.base.join(&entry.stack);
        info!(name = %entry.name, stack = %stack_path.display(), "loading tilt series");

        let stack = read_stack(&stack_path)?;
        entry.assemble(stack)
    }
}

impl TomogramEntry {
    /// Combine the entry's metadata with an already loaded stack.
    pub fn assemble(&self, stack: Array3<f32>) -> Result<Tomogram> {
        let projections = self
            .frames
            .iter()
            .map(|f| Matrix4::from_fn(|r, c| f.projection[r][c]))
            .collect();
        let ctfs = self
            .frames
            .iter()
            .map(|f| Ctf::new(&self.optics, &f.ctf))
            .collect::<Result<Vec<_>>>()?;

        Tomogram::new(
            self.name.clone(),
            stack,
            projections,
            ctfs,
            self.optics.pixel_size,
            (self.width, self.height, self.depth),
        )
    }
}

fn read_stack(path: &Path) -> Result<Array3<f32>> {
    let is_npy = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("npy"))
        .unwrap_or(false);

    if is_npy {
        ndarray_npy::read_npy(path).map_err(|source| ReconError::Npy { path: path.to_path_buf(), source })
    } else {
        Ok(mrc::read_volume(path)?.data)
    }
}
