//! Persistence of the selected best frame.

use crate::liveness::BoundingBox;
use eyre::{Result, WrapErr};
use serde::Serialize;
use std::{
    fs,
    io::Write as _,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};
use uuid::Uuid;

/// Timestamp layout used in capture file names.
const FILE_STAMP: &[FormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]_[subsecond digits:3]");

/// The selected frame of a completed session plus its metadata.
#[derive(Clone, Debug)]
pub struct CaptureArtifact {
    /// Session id.
    pub session_id: Uuid,
    /// Platform id of the paired mobile peer.
    pub platform_id: String,
    /// Wall-clock time of selection.
    pub captured_at: OffsetDateTime,
    /// Composite quality score of the frame.
    pub score: f64,
    /// Mean face depth in meters.
    pub distance_m: f64,
    /// Depth standard deviation in meters.
    pub stddev_m: f64,
    /// Bbox stability component of the score.
    pub stability: f64,
    /// Normalized focus component of the score.
    pub focus: f64,
    /// Face bounding box.
    pub bbox: BoundingBox,
    /// Encoded JPEG of the frame.
    pub jpeg: Vec<u8>,
}

/// Metadata sidecar written next to the JPEG.
#[derive(Debug, Serialize)]
struct Metadata<'a> {
    session_id: &'a Uuid,
    platform_id: &'a str,
    timestamp: String,
    score: f64,
    distance_m: f64,
    stddev_m: f64,
    stability: f64,
    focus: f64,
    bbox: [u32; 4],
}

/// Writes capture artifacts to the captures directory.
#[derive(Clone, Debug)]
pub struct CaptureStore {
    dir: PathBuf,
}

impl CaptureStore {
    /// Creates a store rooted at `dir`. The directory is created lazily.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Persists the artifact atomically and returns the JPEG path.
    ///
    /// Both files are written to temporaries in the target directory and
    /// renamed into place. Blocking; run on the executor.
    pub fn persist(&self, artifact: &CaptureArtifact) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .wrap_err_with(|| format!("creating {}", self.dir.display()))?;
        let stamp = artifact.captured_at.format(&FILE_STAMP).wrap_err("formatting timestamp")?;
        let stem = format!("{stamp}_{}_BEST", artifact.platform_id);
        let jpeg_path = self.dir.join(format!("{stem}.jpg"));
        let json_path = self.dir.join(format!("{stem}.json"));

        write_atomic(&self.dir, &jpeg_path, &artifact.jpeg)?;
        let metadata = serde_json::to_vec_pretty(&Metadata {
            session_id: &artifact.session_id,
            platform_id: &artifact.platform_id,
            timestamp: stamp,
            score: artifact.score,
            distance_m: artifact.distance_m,
            stddev_m: artifact.stddev_m,
            stability: artifact.stability,
            focus: artifact.focus,
            bbox: artifact.bbox.to_array(),
        })?;
        write_atomic(&self.dir, &json_path, &metadata)?;
        Ok(jpeg_path)
    }
}

/// Write-to-temp then rename, within one filesystem.
fn write_atomic(dir: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = NamedTempFile::new_in(dir)
        .wrap_err_with(|| format!("creating temp file in {}", dir.display()))?;
    file.write_all(contents)?;
    file.persist(path).wrap_err_with(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn artifact() -> CaptureArtifact {
        CaptureArtifact {
            session_id: Uuid::new_v4(),
            platform_id: "platform-1".to_owned(),
            captured_at: datetime!(2026-07-31 14:02:05.123 UTC),
            score: 0.91,
            distance_m: 0.65,
            stddev_m: 0.02,
            stability: 0.95,
            focus: 0.8,
            bbox: BoundingBox { x0: 100, y0: 80, x1: 300, y1: 320 },
            jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
        }
    }

    #[test]
    fn writes_jpeg_and_metadata_with_stamped_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path().to_owned());
        let path = store.persist(&artifact()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "20260731_140205_123_platform-1_BEST.jpg"
        );
        assert_eq!(fs::read(&path).unwrap(), vec![0xFF, 0xD8, 0xFF, 0xD9]);
        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(path.with_extension("json")).unwrap()).unwrap();
        assert_eq!(json["platform_id"], "platform-1");
        assert_eq!(json["bbox"], serde_json::json!([100, 80, 300, 320]));
        assert_eq!(json["timestamp"], "20260731_140205_123");
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path().join("nested").join("captures"));
        store.persist(&artifact()).unwrap();
    }
}
