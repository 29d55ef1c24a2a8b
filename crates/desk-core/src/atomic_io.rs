use std::{fs::File, io::Write, path::Path};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

/// Replaces `path` with `content` through a synced sibling temp file and a rename.
///
/// Snapshot readers (record store, processed-event state) only ever see the previous or
/// the new document.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        bail!("snapshot path '{}' has no file name", path.display());
    };
    if path.is_dir() {
        bail!("snapshot path '{}' is a directory", path.display());
    }
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create snapshot directory {}", dir.display()))?;

    let staging = dir.join(format!(
        ".{file_name}.{}.{}.partial",
        std::process::id(),
        current_unix_timestamp_ms()
    ));
    let mut file = File::create(&staging)
        .with_context(|| format!("failed to create {}", staging.display()))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.sync_all())
        .with_context(|| format!("failed to write {}", staging.display()))?;
    drop(file);

    if let Err(error) = std::fs::rename(&staging, path) {
        let _ = std::fs::remove_file(&staging);
        return Err::<(), _>(error).with_context(|| {
            format!("failed to replace {} with {}", path.display(), staging.display())
        });
    }
    Ok(())
}
