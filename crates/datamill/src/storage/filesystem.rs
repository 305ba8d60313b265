use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Highest numbered suffix tried before giving up on a file name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Writes encoded datasets under `<output_directory>/<project_id>/<job_id>/`.
#[derive(Debug, Clone)]
pub struct DatasetStorage {
    output_directory: PathBuf,
}

impl DatasetStorage {
    pub fn new<P: AsRef<Path>>(output_directory: P) -> Self {
        Self {
            output_directory: output_directory.as_ref().to_path_buf(),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Directory that holds the datasets of one job.
    pub fn job_directory(&self, project_id: &str, job_id: &str) -> Result<PathBuf, StorageError> {
        check_component(project_id)?;
        check_component(job_id)?;
        Ok(self.output_directory.join(project_id).join(job_id))
    }

    /// Stores `content` as `<name>.<extension>` in the job directory.
    ///
    /// The file is created exclusively; if the name is taken, `<name>_2`,
    /// `<name>_3`, ... are tried in turn.
    pub fn store(
        &self,
        project_id: &str,
        job_id: &str,
        name: &str,
        extension: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        check_component(name)?;
        check_component(extension)?;
        let dir_path = self.job_directory(project_id, job_id)?;
        ensure_directory(&dir_path)?;

        for counter in 1..=MAX_NAME_ATTEMPTS {
            let try_filename = if counter == 1 {
                format!("{}.{}", name, extension)
            } else {
                format!("{}_{}.{}", name, counter, extension)
            };
            let try_path = dir_path.join(&try_filename);

            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&try_path)
            {
                Ok(mut file) => {
                    let written = file.write_all(content).and_then(|_| file.sync_all());
                    drop(file);
                    discard_on_error(&try_path, written)?;
                    return Ok(try_path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(StorageError::WriteFile {
                        path: try_path,
                        source: e,
                    });
                }
            }
        }

        Err(StorageError::NameExhausted(
            dir_path.join(format!("{}.{}", name, extension)),
        ))
    }

    /// Removes a stored file. Missing files are not an error.
    pub fn remove(&self, path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

/// Removes a partly written file so a later attempt can reuse its name.
fn discard_on_error(path: &Path, written: std::io::Result<()>) -> Result<(), StorageError> {
    written.map_err(|source| {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("Could not remove partial file {}: {}", path.display(), e);
        }
        StorageError::WriteFile {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// A single path segment: non-empty, no separators, not `.` or `..`.
fn check_component(component: &str) -> Result<(), StorageError> {
    let invalid = component.is_empty()
        || component == "."
        || component.contains("..")
        || component.contains('/')
        || component.contains('\\')
        || component.contains('\0');
    if invalid {
        return Err(StorageError::InvalidComponent(component.to_string()));
    }
    Ok(())
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
