use std::path::PathBuf;

/// Everything that can abort a reconstruction run.
///
/// Configuration errors are raised before any file is touched, metadata
/// errors as soon as the tomogram entry is read. Numerical edge cases
/// (out-of-bounds samples, vanishing PSF spectrum) are never errors.
#[derive(Debug)]
pub enum ReconError {
    /// 2D pre-weighting and 3D Wiener weighting were both requested.
    ExclusiveWeighting,
    InvalidConfig(String),
    TomogramIndex { index: usize, count: usize },
    FrameCountMismatch { what: &'static str, expected: usize, got: usize },
    InvalidMetadata(String),
    ShapeMismatch { what: &'static str, expected: Vec<usize>, got: Vec<usize> },
    Fft(String),
    Mrc { path: PathBuf, reason: String },
    Io { path: PathBuf, source: std::io::Error },
    Json { path: PathBuf, source: serde_json::Error },
    Npy { path: PathBuf, source: ndarray_npy::ReadNpyError },
    ThreadPool(rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, ReconError>;

impl std::fmt::Display for ReconError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExclusiveWeighting => {
                write!(f, "3D weighting and 2D pre-weighting are mutually exclusive")
            }
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Self::TomogramIndex { index, count } => {
                write!(f, "tomogram index {} out of range: the set holds {} tomograms", index, count)
            }
            Self::FrameCountMismatch { what, expected, got } => {
                write!(f, "frame count mismatch: expected {} {}, got {}", expected, what, got)
            }
            Self::InvalidMetadata(msg) => write!(f, "invalid tomogram metadata: {}", msg),
            Self::ShapeMismatch { what, expected, got } => {
                write!(f, "shape mismatch for {}: expected {:?}, got {:?}", what, expected, got)
            }
            Self::Fft(msg) => write!(f, "Fourier transform failed: {}", msg),
            Self::Mrc { path, reason } => write!(f, "bad MRC file {:?}: {}", path, reason),
            Self::Io { path, source } => write!(f, "I/O error on {:?}: {}", path, source),
            Self::Json { path, source } => write!(f, "failed to parse {:?}: {}", path, source),
            Self::Npy { path, source } => write!(f, "failed to read NPY {:?}: {}", path, source),
            Self::ThreadPool(e) => write!(f, "failed to start worker threads: {}", e),
        }
    }
}

impl std::error::Error for ReconError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::Npy { source, .. } => Some(source),
            Self::ThreadPool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<realfft::FftError> for ReconError {
    fn from(e: realfft::FftError) -> Self {
        Self::Fft(e.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for ReconError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool(e)
    }
}
