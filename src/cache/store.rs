use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use tracing::{debug, warn};

use super::Fingerprint;
use crate::AppResult;

/// On-disk cache of fitted models, one bincode file per fingerprint.
///
/// Reads and writes are best-effort: a corrupt or unwritable entry is logged
/// and treated as a miss so a bad cache never blocks a run.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, fingerprint: Fingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}.bin"))
    }

    pub fn load<T: Decode<()>>(&self, fingerprint: Fingerprint) -> Option<T> {
        let path = self.path_for(fingerprint);
        if !path.exists() {
            return None;
        }
        match Self::read(&path) {
            Ok(value) => {
                debug!(path = %path.display(), "Loaded cached model");
                Some(value)
            }
            Err(e) => {
                warn!(path = %path.display(), "Ignoring unreadable cached model: {e}");
                None
            }
        }
    }

    fn read<T: Decode<()>>(path: &Path) -> AppResult<T> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::decode_from_reader(
            reader,
            bincode::config::standard(),
        )?)
    }

    pub fn save<T: Encode>(&self, fingerprint: Fingerprint, value: &T) {
        let path = self.path_for(fingerprint);
        if let Err(e) = self.write(&path, value) {
            warn!(path = %path.display(), "Unable to persist the fitted model: {e}");
        } else {
            debug!(path = %path.display(), "Persisted fitted model");
        }
    }

    fn write<T: Encode>(&self, path: &Path, value: &T) -> AppResult<()> {
        topic_atlas_dirs::ensure(&self.dir)?;
        // Write beside the target and rename so readers never see a partial file.
        let tmp = path.with_extension("bin.tmp");
        {
            let f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(f);
            bincode::encode_into_std_write(value, &mut writer, bincode::config::standard())?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Remove every cached model; returns how many files were deleted.
    pub fn clear(&self) -> AppResult<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_model = path
                .extension()
                .is_some_and(|ext| ext == "bin" || ext == "tmp");
            if path.is_file() && is_model {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
