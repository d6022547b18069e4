//! Transfer finalizer: move a received kernel to its templated name

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Placeholder replaced with the SPK object ID
pub const OBJID_PLACEHOLDER: &str = "<OBJID>";

/// Placeholder replaced with the body name
pub const TARGET_PLACEHOLDER: &str = "<TARGET>";

/// Render the kernel file name for an object
///
/// Whitespace and path separators in the target name become `_`, so the
/// result is always a single path component under the output directory.
pub fn render_file_name(template: &str, object_id: &str, target: &str) -> String {
    let target: String = target
        .trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || c == '/' || c == '\\' {
                '_'
            } else {
                c
            }
        })
        .collect();

    template
        .replace(OBJID_PLACEHOLDER, object_id.trim())
        .replace(TARGET_PLACEHOLDER, &target)
}

/// Move a staged kernel to `<output_dir>/<rendered template>`
///
/// An empty staged file is an incomplete transfer naming `object_id`, and is
/// removed. An existing file at the destination is replaced without warning.
pub async fn finalize(
    staged: &Path,
    output_dir: &Path,
    template: &str,
    object_id: &str,
    target: &str,
) -> Result<PathBuf> {
    let length = tokio::fs::metadata(staged).await?.len();
    if length == 0 {
        if let Err(e) = tokio::fs::remove_file(staged).await {
            tracing::debug!(path = %staged.display(), error = %e, "Could not remove empty staged kernel");
        }
        return Err(Error::IncompleteTransfer {
            object: object_id.to_string(),
            received: 0,
            expected: None,
            reason: "service sent an empty kernel".to_string(),
        });
    }

    let dest = output_dir.join(render_file_name(template, object_id, target));
    let finalize_err = |source| Error::Finalize {
        staged: staged.to_path_buf(),
        dest: dest.clone(),
        source,
    };

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(finalize_err)?;
    }

    // rename does not replace an existing file on Windows
    #[cfg(windows)]
    if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
        tokio::fs::remove_file(&dest).await.map_err(finalize_err)?;
    }

    tokio::fs::rename(staged, &dest)
        .await
        .map_err(finalize_err)?;

    tracing::info!(path = %dest.display(), bytes = length, "Kernel written");
    Ok(dest)
}
