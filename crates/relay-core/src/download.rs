use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{channel::port::AttachmentDownloader, errors::Error, utils::unique_filename, Result};

#[derive(Clone, Debug)]
pub struct DownloadConfig {
    pub dir: PathBuf,
    pub timeout: Duration,
    pub max_bytes: u64,
}

/// Downloads attachments over HTTP(S) into a scratch directory.
#[derive(Clone, Debug)]
pub struct HttpDownloader {
    cfg: DownloadConfig,
    http: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(cfg: DownloadConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { cfg, http })
    }

    pub fn dir(&self) -> &Path {
        &self.cfg.dir
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let mut resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Download(format!("request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Download(format!("unexpected status {status}")));
        }

        if let Some(len) = resp.content_length() {
            if len > self.cfg.max_bytes {
                return Err(Error::Download(format!(
                    "file too large: {len} bytes (limit {})",
                    self.cfg.max_bytes
                )));
            }
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| Error::Download(format!("body error: {e}")))?
        {
            written = written.saturating_add(chunk.len() as u64);
            if written > self.cfg.max_bytes {
                return Err(Error::Download(format!(
                    "file exceeds limit of {} bytes",
                    self.cfg.max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl AttachmentDownloader for HttpDownloader {
    async fn download(&self, url: &str, suggested_name: &str) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(&self.cfg.dir).await {
            warn!(dir = %self.cfg.dir.display(), error = %e, "failed to create media directory");
            return None;
        }

        let dest = self.cfg.dir.join(unique_filename(suggested_name));
        match self.fetch(url, &dest).await {
            Ok(()) => {
                debug!(path = %dest.display(), "attachment downloaded");
                Some(dest)
            }
            Err(e) => {
                warn!(filename = suggested_name, error = %e, "failed to download attachment");
                let _ = tokio::fs::remove_file(&dest).await;
                None
            }
        }
    }
}
