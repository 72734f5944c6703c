use crate::{
    config::ModelConfig,
    ort_service::{ClassifierLoadError, OrtClassifier},
};
use flate2::read::GzDecoder;
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("failed to download model artifact: {0}")]
    Download(#[from] reqwest::Error),
    #[error("artifact download from {url} returned {status}")]
    DownloadStatus { url: String, status: u16 },
    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive did not contain the expected directory {0:?}")]
    Layout(PathBuf),
    #[error("failed to load model: {0}")]
    ModelLoad(#[from] ClassifierLoadError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Downloads, unpacks and loads the model artifact. Called once from the
/// warmup task at startup; if the artifact directory is already on disk the
/// network is never touched.
pub struct ModelProvisioner {
    config: ModelConfig,
}

impl ModelProvisioner {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub async fn provision(&self) -> Result<OrtClassifier, ProvisioningError> {
        let artifact_dir = self.ensure_artifact().await?;
        let num_instances = self.config.num_instances;

        let classifier =
            tokio::task::spawn_blocking(move || OrtClassifier::new(&artifact_dir, num_instances))
                .await??;

        Ok(classifier)
    }

    /// Makes sure `{cache_dir}/{artifact_id}` exists, fetching and unpacking
    /// the remote tarball if it does not.
    pub async fn ensure_artifact(&self) -> Result<PathBuf, ProvisioningError> {
        let artifact_dir = self.config.get_artifact_dir();
        if artifact_dir.exists() {
            tracing::info!("Model artifact already present at {:?}", artifact_dir);
            return Ok(artifact_dir);
        }

        let url = self.config.get_artifact_url();
        tracing::info!("Downloading model artifact from {}", url);

        let response = reqwest::get(&url).await?;
        if !response.status().is_success() {
            return Err(ProvisioningError::DownloadStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        let archive_bytes = response.bytes().await?;

        tokio::fs::create_dir_all(&self.config.cache_dir).await?;
        let archive_path = self.config.get_archive_path();
        tokio::fs::write(&archive_path, &archive_bytes).await?;
        tracing::info!("Wrote {} bytes to {:?}", archive_bytes.len(), archive_path);

        let cache_dir = self.config.cache_dir.clone();
        tokio::task::spawn_blocking(move || unpack_tar_gz(&archive_path, &cache_dir)).await??;

        if !artifact_dir.exists() {
            return Err(ProvisioningError::Layout(artifact_dir));
        }

        tracing::info!("Model artifact unpacked to {:?}", artifact_dir);
        Ok(artifact_dir)
    }
}

fn unpack_tar_gz(archive_path: &Path, output_dir: &Path) -> Result<(), std::io::Error> {
    let archive_file = File::open(archive_path)?;
    let decompressor = GzDecoder::new(archive_file);
    let mut archive = tar::Archive::new(decompressor);
    archive.unpack(output_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    fn model_config(cache_dir: &Path) -> ModelConfig {
        ModelConfig {
            // Unroutable on purpose: tests must never hit the network.
            artifact_base_url: "http://127.0.0.1:1".to_string(),
            artifact_id: "vit-test".to_string(),
            cache_dir: cache_dir.to_path_buf(),
            num_instances: 1,
        }
    }

    #[tokio::test]
    async fn ensure_artifact_skips_download_when_dir_exists() {
        let cache = tempfile::tempdir().unwrap();
        let config = model_config(cache.path());
        let artifact_dir = config.get_artifact_dir();
        std::fs::create_dir_all(&artifact_dir).unwrap();

        let provisioner = ModelProvisioner::new(config);
        let resolved = provisioner.ensure_artifact().await.unwrap();

        assert_eq!(resolved, artifact_dir);
    }

    #[tokio::test]
    async fn ensure_artifact_fails_when_remote_is_unreachable() {
        let cache = tempfile::tempdir().unwrap();
        let provisioner = ModelProvisioner::new(model_config(cache.path()));

        let result = provisioner.ensure_artifact().await;
        assert!(matches!(result, Err(ProvisioningError::Download(_))));
    }

    #[test]
    fn unpack_tar_gz_restores_the_artifact_directory() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("vit-test.tar.gz");

        let archive_file = File::create(&archive_path).unwrap();
        let encoder = GzEncoder::new(archive_file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        let contents = br#"{"id2label": {"0": "real"}}"#;
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "vit-test/config.json", &contents[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap().flush().unwrap();

        unpack_tar_gz(&archive_path, dir.path()).unwrap();

        assert!(dir.path().join("vit-test/config.json").exists());
    }
}
