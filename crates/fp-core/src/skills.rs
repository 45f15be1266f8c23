//! `install-skills` / `uninstall-skills`.
//!
//! Copies the slash-command files shipped in `<install>/skills/` into the
//! assistant's command directory, or removes the same file names again.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkillsError {
    #[error("Skills directory not found: {}", dir.display())]
    SourceMissing { dir: PathBuf },

    #[error("cannot determine the home directory")]
    NoHome,

    #[error("failed to copy {}: {source}", path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<SkillsError> for fp_common::Error {
    fn from(err: SkillsError) -> Self {
        match err {
            SkillsError::Io(e) => fp_common::Error::Io(e),
            SkillsError::Copy { source, .. } | SkillsError::Remove { source, .. } => {
                fp_common::Error::Io(source)
            }
            other => fp_common::Error::Config(other.to_string()),
        }
    }
}

/// `~/.claude/commands`.
pub fn default_target_dir() -> Result<PathBuf, SkillsError> {
    dirs::home_dir()
        .map(|home| home.join(".claude").join("commands"))
        .ok_or(SkillsError::NoHome)
}

/// `*.md` files directly under `dir`, sorted by name.
fn skill_files(dir: &Path) -> Result<Vec<PathBuf>, SkillsError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "md"))
        .collect();
    files.sort();
    Ok(files)
}

/// Copy every skill file into `target_dir`. Returns how many were installed.
pub fn install(source_dir: &Path, target_dir: &Path, out: &mut dyn Write) -> Result<usize, SkillsError> {
    if !source_dir.is_dir() {
        return Err(SkillsError::SourceMissing {
            dir: source_dir.to_path_buf(),
        });
    }
    let files = skill_files(source_dir)?;
    if files.is_empty() {
        writeln!(out, "No skills found.")?;
        return Ok(0);
    }

    fs::create_dir_all(target_dir)?;
    let mut names = Vec::with_capacity(files.len());
    for file in &files {
        let Some(file_name) = file.file_name() else {
            continue;
        };
        let dest = target_dir.join(file_name);
        fs::copy(file, &dest).map_err(|source| SkillsError::Copy {
            path: dest.clone(),
            source,
        })?;
        if let Some(stem) = file.file_stem() {
            names.push(stem.to_string_lossy().into_owned());
        }
    }

    writeln!(out, "Installed {} skill(s) to {}", names.len(), target_dir.display())?;
    for name in &names {
        writeln!(out, "  /{name}")?;
    }
    Ok(names.len())
}

/// Remove the files `install` would have copied. A missing source directory
/// is not an error.
pub fn uninstall(source_dir: &Path, target_dir: &Path, out: &mut dyn Write) -> Result<usize, SkillsError> {
    if !source_dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for file in skill_files(source_dir)? {
        let Some(file_name) = file.file_name() else {
            continue;
        };
        let dest = target_dir.join(file_name);
        if dest.is_file() {
            fs::remove_file(&dest).map_err(|source| SkillsError::Remove {
                path: dest.clone(),
                source,
            })?;
            removed += 1;
        }
    }

    if removed == 0 {
        writeln!(out, "No skills to remove.")?;
    } else {
        writeln!(out, "Removed {removed} skill(s)")?;
    }
    Ok(removed)
}
