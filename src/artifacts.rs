use std::path::{Path, PathBuf};

use crate::error::{Result, SignError};

/// On-disk layout for everything the pipeline reads and writes:
///
/// ```text
/// <root>/templates/<template>
/// <root>/signatures/<image>
/// <root>/qrcodes/<request_id>/<document_id>_qrcode.png
/// <root>/signed/<request_id>/<document_id>_signed.<ext>
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub fn signatures_dir(&self) -> PathBuf {
        self.root.join("signatures")
    }

    pub async fn read_template(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.templates_dir().join(safe_component(name)?);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SignError::TemplateNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a stored signature image reference. Absolute paths and paths
    /// relative to the root are tried first, then the file name under
    /// `signatures/`. Returns the last candidate when none exists so the
    /// renderer can report it.
    pub async fn resolve_image(&self, reference: &str) -> PathBuf {
        let normalized = reference.replace('\\', "/");
        let given = Path::new(&normalized);

        let mut candidates = Vec::with_capacity(2);
        if given.is_absolute() {
            candidates.push(given.to_path_buf());
        } else {
            candidates.push(self.root.join(normalized.trim_start_matches('/')));
        }
        if let Some(file_name) = given.file_name() {
            candidates.push(self.signatures_dir().join(file_name));
        }

        for candidate in &candidates {
            if tokio::fs::try_exists(candidate).await.unwrap_or(false) {
                return candidate.clone();
            }
        }
        candidates
            .pop()
            .unwrap_or_else(|| self.signatures_dir().join(normalized))
    }

    pub async fn write_qr(&self, request_id: &str, document_id: &str, png: &[u8]) -> Result<PathBuf> {
        let dir = self.root.join("qrcodes").join(safe_component(request_id)?);
        let file = format!("{}_qrcode.png", safe_component(document_id)?);
        write_file(&dir, &file, png).await
    }

    pub async fn write_signed(
        &self,
        request_id: &str,
        document_id: &str,
        extension: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.root.join("signed").join(safe_component(request_id)?);
        let file = format!("{}_signed.{}", safe_component(document_id)?, extension);
        write_file(&dir, &file, bytes).await
    }

    /// Best-effort removal of an artifact that will not be recorded.
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove artifact");
            }
        }
    }
}

async fn write_file(dir: &Path, file: &str, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// Ids and template names become path components; refuse anything that
/// could escape the artifact root.
fn safe_component(name: &str) -> Result<&str> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(SignError::InvalidInput(format!(
            "unsafe path component: {:?}",
            name
        )));
    }
    Ok(name)
}
