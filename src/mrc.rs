// MRC file (from the Medical Research Council, in the UK)
// https://en.wikipedia.org/wiki/MRC_(file_format)

// format specification:
// https://www.ccpem.ac.uk/mrc_format/mrc2014.php

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use ndarray::Array3;

use crate::error::{ReconError, Result};

const HEADER_BYTES: usize = 1024;
const MODE_I8: u32 = 0;
const MODE_I16: u32 = 1;
const MODE_F32: u32 = 2;
const MODE_U16: u32 = 6;

/// A 3D array read from an MRC file, with its voxel size in Å.
#[derive(Debug, Clone)]
pub struct MrcVolume {
    pub data: Array3<f32>,
    pub pixel_size: f64,
}

/// Write `volume` (`(z, y, x)`) as a float MRC with voxel size
/// `sampling_rate` Å.
pub fn write_volume(path: impl AsRef<Path>, volume: &Array3<f32>, sampling_rate: f64) -> Result<()> {
    let path = path.as_ref();
    let io = |source| ReconError::Io { path: path.to_path_buf(), source };

    let file = File::create(path).map_err(io)?;
    let mut writer = BufWriter::new(file);
    write_to(&mut writer, volume, sampling_rate).map_err(io)?;

    // write buffers should be flushed before dropping
    writer.flush().map_err(io)?;
    Ok(())
}

fn write_to(writer: &mut impl Write, volume: &Array3<f32>, sampling_rate: f64) -> std::io::Result<()> {
    let (nz, ny, nx) = volume.dim();

    let n = volume.len().max(1) as f64;
    let (mut min, mut max, mut sum) = (f32::INFINITY, f32::NEG_INFINITY, 0.0f64);
    for &v in volume.iter() {
        min = min.min(v);
        max = max.max(v);
        sum += v as f64;
    }
    let mean = sum / n;
    let rms = (volume.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n).sqrt();
    if volume.is_empty() {
        (min, max) = (0.0, 0.0);
    }

    // words 1-4: dimensions and mode
    writer.write_u32::<LE>(nx as u32)?;
    writer.write_u32::<LE>(ny as u32)?;
    writer.write_u32::<LE>(nz as u32)?;
    writer.write_u32::<LE>(MODE_F32)?;

    // words 5-7: start indices
    for _ in 0..3 {
        writer.write_i32::<LE>(0)?;
    }

    // words 8-10: sampling grid
    writer.write_u32::<LE>(nx as u32)?;
    writer.write_u32::<LE>(ny as u32)?;
    writer.write_u32::<LE>(nz as u32)?;

    // words 11-16: cell lengths in Å and angles
    for n in [nx, ny, nz] {
        writer.write_f32::<LE>((n as f64 * sampling_rate) as f32)?;
    }
    for _ in 0..3 {
        writer.write_f32::<LE>(90.0)?;
    }

    // words 17-19: axis order x, y, z
    for axis in [1, 2, 3] {
        writer.write_u32::<LE>(axis)?;
    }

    // words 20-22: density statistics
    writer.write_f32::<LE>(min)?;
    writer.write_f32::<LE>(max)?;
    writer.write_f32::<LE>(mean as f32)?;

    // word 23: space group 1 marks a single volume, word 24: no extended header
    writer.write_u32::<LE>(1)?;
    writer.write_u32::<LE>(0)?;

    // words 25-49: extra, with the format version at word 28
    writer.write_all(&[0u8; 4 * 3])?;
    writer.write_u32::<LE>(20140)?;
    writer.write_all(&[0u8; 4 * (49 - 28)])?;

    // words 50-52: origin
    for _ in 0..3 {
        writer.write_f32::<LE>(0.0)?;
    }

    // word 53: "MAP ", word 54: little-endian machine stamp
    writer.write_all(b"MAP ")?;
    writer.write_all(&[0x44, 0x44, 0x00, 0x00])?;

    // word 55: rms, word 56: no labels
    writer.write_f32::<LE>(rms as f32)?;
    writer.write_u32::<LE>(0)?;

    // words 57-256: ten empty 80-byte labels
    writer.write_all(&[0u8; 800])?;

    // voxels, x fastest
    for &v in volume.iter() {
        writer.write_f32::<LE>(v)?;
    }
    Ok(())
}

/// Read a little-endian MRC stack or volume.
pub fn read_volume(path: impl AsRef<Path>) -> Result<MrcVolume> {
    let path = path.as_ref();
    let io = |source| ReconError::Io { path: path.to_path_buf(), source };
    let file = File::open(path).map_err(io)?;
    let len = file.metadata().map_err(io)?.len();
    read_from(&mut BufReader::new(file), len).map_err(|reason| ReconError::Mrc {
        path: path.to_path_buf(),
        reason,
    })
}

/// `len` is the total input length; it bounds the up-front allocation.
fn read_from(reader: &mut impl Read, len: u64) -> std::result::Result<MrcVolume, String> {
    let mut header = [0u8; HEADER_BYTES];
    reader.read_exact(&mut header).map_err(|e| format!("truncated header: {}", e))?;

    if header[212] != 0x44 && header[212] != 0x41 {
        return Err("only little-endian files are supported".to_string());
    }

    let mut h = &header[..];
    let mut word = || h.read_u32::<LE>().map_err(|e| e.to_string());
    let nx = word()? as usize;
    let ny = word()? as usize;
    let nz = word()? as usize;
    let mode = word()?;

    let mut h = &header[28..];
    let mx = h.read_u32::<LE>().map_err(|e| e.to_string())?;
    let mut h = &header[40..];
    let cell_x = h.read_f32::<LE>().map_err(|e| e.to_string())?;
    let mut h = &header[92..];
    let nsymbt = h.read_u32::<LE>().map_err(|e| e.to_string())? as u64;

    let pixel_size = if mx > 0 { cell_x as f64 / mx as f64 } else { 1.0 };

    // skip the extended header
    std::io::copy(&mut reader.by_ref().take(nsymbt), &mut std::io::sink())
        .map_err(|e| format!("truncated extended header: {}", e))?;

    let voxel_bytes = match mode {
        MODE_I8 => 1,
        MODE_I16 | MODE_U16 => 2,
        MODE_F32 => 4,
        other => return Err(format!("unsupported mode {}", other)),
    };

    let count = nx
        .checked_mul(ny)
        .and_then(|n| n.checked_mul(nz))
        .ok_or_else(|| format!("volume dimensions overflow: {}x{}x{}", nx, ny, nz))?;

    let remaining = len.saturating_sub(HEADER_BYTES as u64 + nsymbt) / voxel_bytes;
    let mut voxels = Vec::with_capacity(count.min(usize::try_from(remaining).unwrap_or(usize::MAX)));
    let truncated = |e: std::io::Error| format!("truncated voxel data: {}", e);
    for _ in 0..count {
        let v = match mode {
            MODE_I8 => reader.read_i8().map_err(truncated)? as f32,
            MODE_I16 => reader.read_i16::<LE>().map_err(truncated)? as f32,
            MODE_U16 => reader.read_u16::<LE>().map_err(truncated)? as f32,
            _ => reader.read_f32::<LE>().map_err(truncated)?,
        };
        voxels.push(v);
    }

    let data = Array3::from_shape_vec((nz, ny, nx), voxels).map_err(|e| e.to_string())?;
    Ok(MrcVolume { data, pixel_size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn write_then_read_keeps_voxels_and_sampling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.mrc");
        let volume = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as f32 - 50.0);

        write_volume(&path, &volume, 10.8).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_BYTES + 4 * 60);
        assert_eq!(&bytes[208..212], b"MAP ");

        let back = read_volume(&path).unwrap();
        assert_eq!(back.data, volume);
        assert_abs_diff_eq!(back.pixel_size, 10.8, epsilon = 1e-5);
    }

    #[test]
    fn header_statistics() {
        let mut buf = Vec::new();
        let volume = Array3::from_shape_vec((1, 1, 4), vec![1.0f32, 2.0, 3.0, 6.0]).unwrap();
        write_to(&mut buf, &volume, 1.0).unwrap();

        let mut h = &buf[76..88];
        assert_eq!(h.read_f32::<LE>().unwrap(), 1.0);
        assert_eq!(h.read_f32::<LE>().unwrap(), 6.0);
        assert_eq!(h.read_f32::<LE>().unwrap(), 3.0);
    }

    #[test]
    fn reads_integer_modes() {
        let mut buf = Vec::new();
        let volume = Array3::<f32>::zeros((1, 2, 2));
        write_to(&mut buf, &volume, 2.0).unwrap();
        buf.truncate(HEADER_BYTES);
        buf[12..16].copy_from_slice(&MODE_I16.to_le_bytes());
        for v in [-3i16, 7, 0, 1200] {
            buf.extend_from_slice(&v.to_le_bytes());
        }

        let back = read_from(&mut &buf[..], buf.len() as u64).unwrap();
        assert_eq!(back.data.as_slice().unwrap(), &[-3.0, 7.0, 0.0, 1200.0]);
        assert_abs_diff_eq!(back.pixel_size, 2.0);
    }

    #[test]
    fn truncated_files_are_rejected() {
        let err = read_from(&mut &[0u8; 100][..], 100).unwrap_err();
        assert!(err.contains("truncated"));
    }

    fn header_with_dims(nx: u32, ny: u32, nz: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        write_to(&mut buf, &Array3::<f32>::zeros((1, 1, 1)), 1.0).unwrap();
        buf.truncate(HEADER_BYTES);
        buf[0..4].copy_from_slice(&nx.to_le_bytes());
        buf[4..8].copy_from_slice(&ny.to_le_bytes());
        buf[8..12].copy_from_slice(&nz.to_le_bytes());
        buf
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let buf = header_with_dims(1 << 22, 1 << 22, 1 << 22);
        let err = read_from(&mut &buf[..], buf.len() as u64).unwrap_err();
        assert!(err.contains("overflow"), "{}", err);
    }

    #[test]
    fn huge_header_on_short_file_is_truncated_not_allocated() {
        let mut buf = header_with_dims(1 << 15, 1 << 15, 1 << 10);
        buf.extend_from_slice(&[0u8; 64]);
        let err = read_from(&mut &buf[..], buf.len() as u64).unwrap_err();
        assert!(err.contains("truncated voxel data"), "{}", err);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut buf = header_with_dims(1, 1, 1);
        buf[12..16].copy_from_slice(&9u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        let err = read_from(&mut &buf[..], buf.len() as u64).unwrap_err();
        assert!(err.contains("unsupported mode 9"));
    }

    #[test]
    fn read_volume_reports_bad_headers_as_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.mrc");
        std::fs::write(&path, header_with_dims(1 << 22, 1 << 22, 1 << 22)).unwrap();
        assert!(matches!(read_volume(&path), Err(ReconError::Mrc { .. })));
    }
}
