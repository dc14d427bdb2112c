use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use tracing::{debug, info};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::error::PipeminError;
use crate::pipeline::Artifact;
use crate::source::rooted_pattern;

/// Writes each artifact to `dest/<relative>`, creating directories as needed.
pub fn write_dest(artifacts: &[Artifact], dest: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let target = dest.join(&artifact.relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| PipeminError::filesystem(parent, err))?;
        }
        fs::write(&target, &artifact.contents)
            .map_err(|err| PipeminError::filesystem(&target, err))?;
        debug!(file = %target.display(), bytes = artifact.contents.len(), "Wrote file");
        written.push(target);
    }
    Ok(written)
}

/// Recursively removes `dir`; a missing directory is not an error.
pub fn remove_dir(dir: &Path) -> Result<bool> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            info!(path = %dir.display(), "Removed directory");
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %dir.display(), "Directory already absent");
            Ok(false)
        }
        Err(err) => Err(PipeminError::filesystem(dir, err).into()),
    }
}

/// Archives every file below `dir` into a zip at `archive`; entry names are
/// relative to `dir`. Returns the number of archived files.
pub fn package_dir(dir: &Path, archive: &Path) -> Result<usize> {
    let pattern = rooted_pattern(dir, "**/*");
    let mut files = Vec::new();
    for entry in glob(&pattern).with_context(|| format!("Invalid glob pattern: {pattern}"))? {
        let path = entry.with_context(|| format!("Failed to read match of {pattern}"))?;
        if path.is_file() && path != archive {
            files.push(path);
        }
    }
    files.sort();

    if let Some(parent) = archive.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| PipeminError::filesystem(parent, err))?;
    }
    let file = File::create(archive).map_err(|err| PipeminError::filesystem(archive, err))?;
    let mut writer = zip::ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in &files {
        let name = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let contents = fs::read(path).map_err(|err| PipeminError::filesystem(path, err))?;
        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("Failed to add '{name}' to {}", archive.display()))?;
        writer
            .write_all(&contents)
            .map_err(|err| PipeminError::filesystem(archive, err))?;
    }

    let mut inner = writer
        .finish()
        .with_context(|| format!("Failed to finish archive: {}", archive.display()))?;
    inner
        .flush()
        .map_err(|err| PipeminError::filesystem(archive, err))?;
    Ok(files.len())
}
