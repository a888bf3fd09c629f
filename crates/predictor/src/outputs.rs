//! Scratch directory handling: wiping before a run and collecting the
//! files the backend produced.

use std::io;
use std::path::{Path, PathBuf};

/// Archive metadata folder that is never reported as output.
pub const MACOS_METADATA_DIR: &str = "__MACOSX";

/// Delete `dir` with everything in it, then create it again empty.
pub async fn reset_directory(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

/// List every file under `dir`, recursing into subdirectories.
///
/// Entries are returned in directory-listing order. Each one is logged
/// relative to `dir`, directories with a trailing `/`.
pub async fn collect_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    tracing::info!("Contents of {}:", dir.display());
    let mut files = Vec::new();
    collect_recursive(dir, "", &mut files).await?;
    Ok(files)
}

async fn collect_recursive(dir: &Path, prefix: &str, files: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == MACOS_METADATA_DIR {
            continue;
        }

        let path = entry.path();
        // Follow symlinks; dangling ones are neither file nor directory.
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        if metadata.is_file() {
            tracing::info!("{prefix}{name}");
            files.push(path);
        } else if metadata.is_dir() {
            tracing::info!("{prefix}{name}/");
            let nested = format!("{prefix}{name}/");
            Box::pin(collect_recursive(&path, &nested, files)).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, b"png").expect("write file");
    }

    #[tokio::test]
    async fn collects_nested_files_and_skips_macos_metadata() {
        let dir = tempfile::tempdir().expect("create temp dir");
        touch(&dir.path().join("ComfyUI_00001_.png"));
        touch(&dir.path().join("batch/ComfyUI_00002_.png"));
        touch(&dir.path().join("__MACOSX/._ComfyUI_00001_.png"));

        let mut files = collect_files(dir.path()).await.expect("collect");
        files.sort();

        assert_eq!(
            files,
            vec![
                dir.path().join("ComfyUI_00001_.png"),
                dir.path().join("batch/ComfyUI_00002_.png"),
            ]
        );
    }

    #[tokio::test]
    async fn empty_directory_has_no_outputs() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::create_dir(dir.path().join("empty")).expect("mkdir");
        assert!(collect_files(dir.path()).await.expect("collect").is_empty());
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        assert!(collect_files(&dir.path().join("nope")).await.is_err());
    }

    #[tokio::test]
    async fn reset_creates_missing_directory() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let scratch = dir.path().join("a/b/outputs");
        reset_directory(&scratch).await.expect("reset");
        assert!(scratch.is_dir());
    }

    #[tokio::test]
    async fn reset_wipes_existing_contents() {
        let dir = tempfile::tempdir().expect("create temp dir");
        touch(&dir.path().join("old.png"));
        touch(&dir.path().join("nested/old.png"));

        reset_directory(dir.path()).await.expect("reset");

        assert!(dir.path().is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).expect("read_dir").count(), 0);
    }
}
