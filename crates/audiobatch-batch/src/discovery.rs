use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use audiobatch_utils::{DiscoveryError, file_id_for};

/// One candidate input and the id its state is keyed by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub file_id: String,
    pub path: PathBuf,
}

impl InputFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            file_id: file_id_for(&path),
            path,
        }
    }
}

/// List processable inputs in `dir`, sorted by file name.
///
/// Only regular, non-hidden files whose extension is in `extensions` (lowercase, compared
/// case-insensitively) qualify. Two files mapping to one `file_id` is an error because they
/// would share state. `limit` caps the result after sorting.
pub fn discover_inputs(
    dir: &Path,
    extensions: &[String],
    limit: Option<usize>,
) -> Result<Vec<InputFile>, DiscoveryError> {
    if !dir.is_dir() {
        return Err(DiscoveryError::InputDirMissing {
            path: dir.display().to_string(),
        });
    }
    let read_failed = |e: std::io::Error| DiscoveryError::ReadFailed {
        path: dir.display().to_string(),
        reason: e.to_string(),
    };

    let mut inputs = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_failed)? {
        let path = entry.map_err(read_failed)?.path();
        if is_hidden(&path) || !path.is_file() || !has_allowed_extension(&path, extensions) {
            continue;
        }
        inputs.push(InputFile::new(path));
    }
    inputs.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));

    if let Some(limit) = limit
        && inputs.len() > limit
    {
        tracing::info!(found = inputs.len(), limit, "Applying batch size cap");
        inputs.truncate(limit);
    }

    // Files past the cap never reach the state document, so they cannot collide
    let mut seen: HashMap<&str, &Path> = HashMap::new();
    for input in &inputs {
        if let Some(first) = seen.insert(&input.file_id, &input.path) {
            return Err(DiscoveryError::DuplicateFileId {
                file_id: input.file_id.clone(),
                first: first.display().to_string(),
                second: input.path.display().to_string(),
            });
        }
    }

    Ok(inputs)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .is_some_and(|ext| extensions.iter().any(|allowed| *allowed == ext))
}
