/*
 * Copyright 2024 Oxide Computer Company
 */

/*
 * Files that live next to the G-code a job is run against.  For "part.gcode"
 * these are "original_part.gcode", an unmodified copy kept by the slicer
 * when it post-processes its output, and "simulated_part.gcode" or
 * "optimized_part.gcode" for the result.
 */

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use helio_types::JobKind;

fn sibling(source: &Path, prefix: &str) -> Result<PathBuf> {
    let name = source
        .file_name()
        .ok_or_else(|| anyhow!("{:?} does not name a file", source))?;

    let mut n = std::ffi::OsString::from(prefix);
    n.push(name);
    Ok(source.with_file_name(n))
}

pub fn original_path(source: &Path) -> Result<PathBuf> {
    sibling(source, "original_")
}

pub fn result_path(source: &Path, kind: JobKind) -> Result<PathBuf> {
    sibling(source, kind.result_prefix())
}

/**
 * The file to upload: the unmodified copy if there is one, otherwise the
 * G-code itself.
 */
pub fn upload_source(source: &Path) -> Result<PathBuf> {
    let orig = original_path(source)?;
    if orig.is_file() {
        Ok(orig)
    } else {
        Ok(source.to_path_buf())
    }
}

/**
 * Remove the unmodified copy, if any.  Returns true if a file was removed.
 */
pub fn clear_file_cache(source: &Path) -> Result<bool> {
    let orig = original_path(source)?;
    match std::fs::remove_file(&orig) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(anyhow!("removing {:?}: {}", orig, e)),
    }
}
