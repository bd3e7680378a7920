use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use roofsketch_contracts::history::HistoryEntry;
use roofsketch_contracts::payload::GeneratedImage;

pub const LATEST_DOWNLOAD_STEM: &str = "roof-sketch-latest";

pub fn latest_download_name(image: &GeneratedImage) -> String {
    format!("{LATEST_DOWNLOAD_STEM}.{}", image.extension())
}

/// Decodes the payload and writes it under `dir`, creating the directory.
pub fn write_download(dir: &Path, file_name: &str, image: &GeneratedImage) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let bytes = image.decode_bytes()?;
    let path = dir.join(file_name);
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn write_history_entry(dir: &Path, entry: &HistoryEntry) -> Result<PathBuf> {
    write_download(dir, &entry.download_name(), &entry.image)
}
