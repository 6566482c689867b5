use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

const TEMP_PREFIX: &str = ".tmp_";

/// Replace `file_path` atomically.
///
/// The contents land in a hidden temporary file next to `file_path`, are
/// flushed to disk and then renamed over the target. Readers observe either
/// the previous file or the new one, never a mix.
pub fn write<P: AsRef<Path>>(file_path: P, contents: impl AsRef<[u8]>) -> Result<()> {
    let file_path = file_path.as_ref();
    let parent_dir = file_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("File path has no parent directory"))?;

    let temp_path = create_temp_file_path(parent_dir);

    let result = write_synced(&temp_path, contents.as_ref())
        .with_context(|| format!("Failed to write to temporary file: {}", temp_path.display()))
        .and_then(|()| {
            fs::rename(&temp_path, file_path).with_context(|| {
                format!(
                    "Failed to move temporary file to final location: {}",
                    file_path.display()
                )
            })
        });

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    result
}

/// Write atomically, creating all leading directories.
pub fn create_dirs_then_write<P: AsRef<Path>>(
    file_path: P,
    contents: impl AsRef<[u8]>,
) -> Result<()> {
    let file_path = file_path.as_ref();

    if let Some(parent_dir) = file_path.parent() {
        fs::create_dir_all(parent_dir)
            .with_context(|| format!("Failed to create directory: {}", parent_dir.display()))?;
    }

    write(file_path, contents)
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<P: AsRef<Path>, T: Serialize>(file_path: P, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).context("Failed to serialize JSON document")?;
    write(file_path, json)
}

fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn create_temp_file_path(dir: &Path) -> PathBuf {
    use std::time::UNIX_EPOCH;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let process_id = std::process::id();
    let sequence = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_name = format!("{}{}__{}__{}", TEMP_PREFIX, process_id, timestamp, sequence);

    dir.join(temp_name)
}

/// Remove temporary files left in `dir` by writes that never reached the
/// rename, e.g. after a crash. Only files last modified at least `older_than`
/// ago are removed, so writes in flight elsewhere are left alone. Returns how
/// many files were removed.
pub fn remove_stale_temp_files(dir: &Path, older_than: Duration) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => {
            return Err(anyhow::Error::from(err)
                .context(format!("Failed to list {}", dir.display())));
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }

        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < older_than {
            continue;
        }

        let path = entry.path();
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        removed += 1;
    }

    Ok(removed)
}

/// Read and parse a JSON file. A missing file is `Ok(None)`.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(anyhow::Error::from(err)
                .context(format!("Failed to read {}", path.display())));
        }
    };
    let value: T = serde_json::from_slice(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

pub fn read_toml_file_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(err) => return Err(err.into()),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let value: T =
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(value)
}
