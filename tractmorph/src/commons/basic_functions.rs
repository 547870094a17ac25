use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::ProgressStyle;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zip::ZipArchive;

/// Create the directory if it doesn't exist; error if a non-directory exists there.
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("Path exists but is not a directory: {}", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
    }
    Ok(())
}

/// Replace `target` in one step: write to a temp file in the same directory, then rename.
/// Readers never observe a partially written file.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_dir_exists(&parent)?;

    let mut tmp = NamedTempFile::new_in(&parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync {}", target.display()))?;
    tmp.persist(target)
        .with_context(|| format!("Failed to rename into {}", target.display()))?;
    Ok(())
}

/// Extracts the given `.zip` file to the target directory.
pub fn extract_zip(zip_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = fs::File::open(zip_path)
        .with_context(|| format!("Failed to open {}", zip_path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip archive {}", zip_path.display()))?;
    archive.extract(dest_dir).with_context(|| {
        format!(
            "Failed to extract {} to {}",
            zip_path.display(),
            dest_dir.display()
        )
    })?;
    Ok(())
}

/// First file directly inside `dir` with the given extension (case-insensitive).
pub fn find_file_with_extension(dir: &Path, extension: &str) -> Result<Option<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    Ok(entries.into_iter().find(|p| {
        p.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false)
    }))
}

/// Append a failure block to an append-only error log:
/// a `####...Error: {unit}####...` banner, the UTC time, then the error chain.
pub fn append_error_log(log_path: &Path, unit: &str, error: &anyhow::Error) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        ensure_dir_exists(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;

    let banner = "#".repeat(20);
    writeln!(file, "{}Error: {}{}", banner, unit, banner)?;
    writeln!(file, "{}", Utc::now().to_rfc3339())?;
    writeln!(file, "{:#}", error)?;
    Ok(())
}

/// Leading numeric part of a free-form value such as `"12.5 m"` or `"7;8"`.
pub fn parse_leading_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let end = trimmed
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {percent} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}
