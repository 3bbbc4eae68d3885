use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, warn};
use zentara_core::text_edit::apply_text_edits_utf16;

use crate::lsp::uri_to_path;
use crate::protocol::WorkspaceEdit;

#[derive(Debug, Clone)]
pub struct EditOptions {
    pub create_backups: bool,
    pub backup_suffix: String,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self {
            create_backups: false,
            backup_suffix: zentara_core::config::DEFAULT_BACKUP_SUFFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppliedEdit {
    pub files_modified: Vec<String>,
    pub backup_files: Vec<String>,
}

struct PendingFile {
    path: PathBuf,
    original: Vec<u8>,
    backup_path: Option<PathBuf>,
    edits: Vec<zentara_core::text_edit::TextEdit>,
}

/// Writes every text edit of `edit` to disk. Files must live under
/// `workspace_root`; on any failure all files are restored.
pub async fn apply_workspace_edit(
    workspace_root: &Path,
    edit: &WorkspaceEdit,
    options: &EditOptions,
) -> Result<AppliedEdit> {
    let root = workspace_root
        .canonicalize()
        .with_context(|| format!("failed to canonicalize workspace root: {workspace_root:?}"))?;

    let mut files = Vec::new();
    for (uri, edits) in edit.text_edits_by_uri()? {
        if edits.is_empty() {
            continue;
        }
        let path = uri_to_path(&uri)
            .with_context(|| format!("unsupported edit URI (only file:// supported): {uri}"))?;
        let canonical = path
            .canonicalize()
            .with_context(|| format!("failed to canonicalize {path:?}"))?;
        if !canonical.starts_with(&root) {
            return Err(anyhow!(
                "refusing to write outside workspace root (root={root:?}, path={canonical:?})"
            ));
        }

        let original = tokio::fs::read(&canonical)
            .await
            .with_context(|| format!("failed to read file: {canonical:?}"))?;
        files.push(PendingFile {
            path: canonical,
            original,
            backup_path: None,
            edits,
        });
    }

    let mut applied = AppliedEdit::default();

    if options.create_backups {
        for f in &mut files {
            let backup_path = backup_path_for(&f.path, &options.backup_suffix)?;
            tokio::fs::write(&backup_path, &f.original)
                .await
                .with_context(|| format!("failed to write backup file: {backup_path:?}"))?;
            applied
                .backup_files
                .push(backup_path.to_string_lossy().to_string());
            f.backup_path = Some(backup_path);
        }
    }

    let result: Result<()> = async {
        for f in &files {
            let text = std::str::from_utf8(&f.original).context("file is not valid UTF-8")?;
            let updated = apply_text_edits_utf16(text, &f.edits)
                .with_context(|| format!("failed to apply edits to {:?}", f.path))?;
            write_replacing(&f.path, updated.as_bytes()).await?;
            debug!("applied {} edit(s) to {:?}", f.edits.len(), f.path);
            applied
                .files_modified
                .push(f.path.to_string_lossy().to_string());
        }
        Ok(())
    }
    .await;

    if let Err(err) = result {
        warn!("rolling back workspace edit: {err:#}");
        for f in &files {
            let _ = tokio::fs::write(&f.path, &f.original).await;
            if let Some(backup_path) = &f.backup_path {
                let _ = tokio::fs::remove_file(backup_path).await;
            }
        }
        return Err(err);
    }

    Ok(applied)
}

fn backup_path_for(path: &Path, backup_suffix: &str) -> Result<PathBuf> {
    if backup_suffix.is_empty() {
        return Err(anyhow!("backup_suffix must not be empty"));
    }
    if backup_suffix.contains(['/', '\\', ':']) {
        return Err(anyhow!(
            "backup_suffix must not contain path separators or ':'"
        ));
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("path has no file name: {path:?}"))?
        .to_string_lossy();
    Ok(path.with_file_name(format!("{file_name}{backup_suffix}")))
}

/// Temp file + rename, falling back to remove-then-rename on platforms
/// where rename does not overwrite.
async fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path has no parent: {path:?}"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("path has no file name: {path:?}"))?
        .to_string_lossy();

    let tmp_path = parent.join(format!(".{file_name}.zentara-tmp-{}", std::process::id()));
    tokio::fs::write(&tmp_path, bytes)
        .await
        .with_context(|| format!("failed to write temp file: {tmp_path:?}"))?;

    if let Err(rename_err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(path).await;
        if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(anyhow!(
                "failed to replace file: {path:?} (rename_err={rename_err}, err={err})"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::path_to_uri;
    use crate::protocol::{Position, Range, TextEdit};
    use tempfile::tempdir;

    fn replace_first_word(path: &Path) -> WorkspaceEdit {
        let range = Range::new(Position::new(0, 0), Position::new(0, 5));
        WorkspaceEdit::single(path_to_uri(path).unwrap(), TextEdit::replace(range, "world"))
    }

    #[tokio::test]
    async fn writes_file_and_backup() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.rs");
        tokio::fs::write(&file, "hello\n").await.unwrap();
        let canonical = file.canonicalize().unwrap();

        let options = EditOptions {
            create_backups: true,
            backup_suffix: ".bak".to_string(),
        };
        let applied = apply_workspace_edit(dir.path(), &replace_first_word(&canonical), &options)
            .await
            .unwrap();

        assert_eq!(applied.files_modified.len(), 1);
        assert_eq!(tokio::fs::read_to_string(&canonical).await.unwrap(), "world\n");
        let backup = tokio::fs::read_to_string(&applied.backup_files[0]).await.unwrap();
        assert_eq!(backup, "hello\n");
    }

    #[tokio::test]
    async fn restores_file_when_an_edit_is_out_of_range() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.rs");
        tokio::fs::write(&file, "hello\n").await.unwrap();
        let canonical = file.canonicalize().unwrap();

        let edit = WorkspaceEdit::single(
            path_to_uri(&canonical).unwrap(),
            TextEdit::insert(Position::new(999, 0), "x"),
        );
        let options = EditOptions {
            create_backups: true,
            ..EditOptions::default()
        };
        apply_workspace_edit(dir.path(), &edit, &options)
            .await
            .unwrap_err();

        assert_eq!(tokio::fs::read_to_string(&canonical).await.unwrap(), "hello\n");
        assert!(!canonical.with_file_name("a.rs.bak").exists());
    }

    #[tokio::test]
    async fn refuses_paths_outside_the_workspace() {
        let root = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let file = outside.path().join("a.rs");
        tokio::fs::write(&file, "hello\n").await.unwrap();
        let canonical = file.canonicalize().unwrap();

        let err = apply_workspace_edit(
            root.path(),
            &replace_first_word(&canonical),
            &EditOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("outside workspace root"));
        assert_eq!(tokio::fs::read_to_string(&canonical).await.unwrap(), "hello\n");
    }

    #[test]
    fn backup_suffix_must_be_a_plain_suffix() {
        let path = Path::new("/tmp/a.rs");
        assert!(backup_path_for(path, "").is_err());
        assert!(backup_path_for(path, "/../evil").is_err());
        assert_eq!(
            backup_path_for(path, ".orig").unwrap(),
            PathBuf::from("/tmp/a.rs.orig")
        );
    }
}
