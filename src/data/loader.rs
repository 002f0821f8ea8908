use crate::alignment::AlignmentRecord;
use crate::data::stack::ImageStack;
use anyhow::{bail, Context, Result};
use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};
use std::fs;
use std::path::{Path, PathBuf};

/// Load one frame as `f32` in raw 16-bit counts.
pub fn load_frame<P: AsRef<Path>>(path: P) -> Result<Array2<f32>> {
    let path = path.as_ref();
    let img = image::open(path)
        .with_context(|| format!("cannot open frame {}", path.display()))?
        .to_luma16();
    let (width, height) = img.dimensions();
    let data: Vec<f32> = img.into_raw().into_iter().map(f32::from).collect();
    Ok(Array2::from_shape_vec((height as usize, width as usize), data)?)
}

fn write_png(path: &Path, frame: ArrayView2<f32>, to_count: impl Fn(f32) -> u16) -> Result<()> {
    let (rows, cols) = frame.dim();
    let pixels: Vec<u16> = frame.iter().map(|v| to_count(*v)).collect();
    let img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_raw(cols as u32, rows as u32, pixels)
        .context("frame buffer does not match its dimensions")?;
    img.save(path)
        .with_context(|| format!("cannot write frame {}", path.display()))
}

/// Save a frame as 16-bit grayscale PNG, rounding and clamping the values.
pub fn save_frame<P: AsRef<Path>>(path: P, frame: ArrayView2<f32>) -> Result<()> {
    write_png(path.as_ref(), frame, |v| v.round().clamp(0.0, u16::MAX as f32) as u16)
}

/// Save a frame stretched to the full 16-bit range.
pub fn save_frame_normalized<P: AsRef<Path>>(path: P, frame: ArrayView2<f32>) -> Result<()> {
    let (min, max) = frame
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let range = if max > min { max - min } else { 1.0 };
    write_png(path.as_ref(), frame, |v| (((v - min) / range) * u16::MAX as f32).round() as u16)
}

/// PNG files in `dir`, sorted by name.
pub fn list_frames<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("cannot list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Tilt angles in degrees, one per line; blank lines and `#` comments are
/// skipped.
pub fn load_angles<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("cannot read angles {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(i, line)| {
            line.parse::<f64>()
                .with_context(|| format!("{}:{}: invalid angle '{}'", path.display(), i + 1, line))
        })
        .collect()
}

/// Stack of every PNG frame in `dir`, with optional angles.
pub fn load_stack<P: AsRef<Path>>(dir: P, angles: Option<Vec<f64>>) -> Result<ImageStack> {
    let paths = list_frames(&dir)?;
    if paths.is_empty() {
        bail!("no PNG frames found in {}", dir.as_ref().display());
    }
    let frames = paths.iter().map(load_frame).collect::<Result<Vec<_>>>()?;
    Ok(ImageStack::from_frames(frames, angles)?)
}

/// Write every frame as `<prefix>_<index>.png` into `dir`.
pub fn save_stack<P: AsRef<Path>>(dir: P, stack: &ImageStack, prefix: &str, normalize: bool) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    let width = stack.frame_count().to_string().len().max(3);
    (0..stack.frame_count())
        .map(|i| {
            let path = dir.join(format!("{}_{:0width$}.png", prefix, i, width = width));
            if normalize {
                save_frame_normalized(&path, stack.frame(i))?;
            } else {
                save_frame(&path, stack.frame(i))?;
            }
            Ok(path)
        })
        .collect()
}

pub fn save_record<P: AsRef<Path>>(path: P, record: &AlignmentRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)?;
    fs::write(path.as_ref(), json).with_context(|| format!("cannot write record {}", path.as_ref().display()))
}

pub fn load_record<P: AsRef<Path>>(path: P) -> Result<AlignmentRecord> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("cannot read record {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid alignment record {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{FrameCorrection, ShiftTable};
    use ndarray::Array3;
    use tempfile::tempdir;

    #[test]
    fn test_frame_round_trip_keeps_16bit_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Array2::from_shape_fn((5, 7), |(y, x)| (y * 1000 + x * 3) as f32);
        save_frame(&path, frame.view()).unwrap();
        assert_eq!(load_frame(&path).unwrap(), frame);
    }

    #[test]
    fn test_normalized_frame_spans_full_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("norm.png");
        let frame = Array2::from_shape_fn((4, 4), |(y, x)| (y + x) as f32 * 0.1);
        save_frame_normalized(&path, frame.view()).unwrap();
        let loaded = load_frame(&path).unwrap();
        assert_eq!(loaded[[0, 0]], 0.0);
        assert_eq!(loaded[[3, 3]], u16::MAX as f32);
    }

    #[test]
    fn test_stack_and_record_round_trip() {
        let dir = tempdir().unwrap();
        let data = Array3::from_shape_fn((3, 6, 4), |(f, y, x)| (f * 100 + y * 4 + x) as f32);
        let stack = ImageStack::new(data, None).unwrap();
        let paths = save_stack(dir.path(), &stack, "frame", false).unwrap();
        assert_eq!(paths.len(), 3);
        let loaded = load_stack(dir.path(), Some(vec![-10.0, 0.0, 10.0])).unwrap();
        assert_eq!(loaded.data(), stack.data());

        let record = AlignmentRecord::with_correction(
            "PC",
            Some(1),
            FrameCorrection::Shifts(ShiftTable::new(vec![(1.0, 0.0), (0.0, 0.0), (-2.0, 0.5)])),
        );
        let record_path = dir.path().join("record.json");
        save_record(&record_path, &record).unwrap();
        assert_eq!(load_record(&record_path).unwrap(), record);
    }

    #[test]
    fn test_angles_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("angles.txt");
        fs::write(&path, "# tilt\n-20\n\n0.5\n20\n").unwrap();
        assert_eq!(load_angles(&path).unwrap(), vec![-20.0, 0.5, 20.0]);
        fs::write(&path, "-20\nabc\n").unwrap();
        assert!(load_angles(&path).is_err());
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempdir().unwrap();
        assert!(load_stack(dir.path(), None).is_err());
    }
}
