//! Source fetching and unpacking.
//!
//! A [`Fetcher`] downloads a plan's source into a cache directory and
//! verifies it against the plan's checksum. The default [`HttpFetcher`]
//! handles `http(s)://` through reqwest, plus `file://` URLs and bare local
//! paths. Verified downloads are reused on later fetches.

mod unpack;

use std::future::Future;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use std::io::Write;

use tokio::fs;
use tracing::{debug, info};

pub use unpack::unpack_archive;

use crate::plan::Checksum;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to fetch {url}: {message}")]
  FetchFailed { url: String, message: String },

  #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("failed to unpack {archive}: {message}")]
  Unpack { archive: PathBuf, message: String },

  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> FetchError + '_ {
  move |source| FetchError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Downloads and verifies plan sources.
pub trait Fetcher: Send + Sync {
  /// Fetch `url` into `dest_dir` and verify it against `checksum`.
  fn fetch(
    &self,
    url: &str,
    checksum: &Checksum,
    dest_dir: &Path,
  ) -> impl Future<Output = Result<PathBuf, FetchError>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  async fn read_source(&self, url: &str) -> Result<Vec<u8>, FetchError> {
    if let Some(path) = local_path(url) {
      return fs::read(&path).await.map_err(|e| FetchError::FetchFailed {
        url: url.to_string(),
        message: e.to_string(),
      });
    }

    let failed = |message: String| FetchError::FetchFailed {
      url: url.to_string(),
      message,
    };
    let response = self.client.get(url).send().await.map_err(|e| failed(e.to_string()))?;
    if !response.status().is_success() {
      return Err(failed(format!("HTTP {}", response.status())));
    }
    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    Ok(bytes.to_vec())
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, url: &str, checksum: &Checksum, dest_dir: &Path) -> Result<PathBuf, FetchError> {
    fs::create_dir_all(dest_dir).await.map_err(io_at(dest_dir))?;
    let dest_path = dest_dir.join(url_to_filename(url));

    if dest_path.exists() {
      let path = dest_path.clone();
      let expected = checksum.clone();
      let cached = tokio::task::spawn_blocking(move || expected.digest_file(&path)).await;
      match cached {
        Ok(Ok(actual)) if actual == checksum.digest => {
          info!(path = %dest_path.display(), "using cached source");
          return Ok(dest_path);
        }
        Ok(Ok(actual)) => {
          debug!(expected = %checksum.digest, actual = %actual, "cached source hash mismatch, re-fetching")
        }
        _ => debug!(path = %dest_path.display(), "cached source unreadable, re-fetching"),
      }
    }

    info!(url = %url, "fetching source");
    let bytes = self.read_source(url).await?;

    let actual = checksum.digest_bytes(&bytes);
    if actual != checksum.digest {
      return Err(FetchError::ChecksumMismatch {
        url: url.to_string(),
        expected: checksum.to_string(),
        actual: format!("{}:{actual}", checksum.algorithm.as_str()),
      });
    }

    let size = bytes.len();
    let (dir, dest) = (dest_dir.to_path_buf(), dest_path.clone());
    tokio::task::spawn_blocking(move || persist_download(&dir, &dest, &bytes))
      .await
      .map_err(|e| FetchError::Io {
        path: dest_path.clone(),
        source: std::io::Error::other(e),
      })??;

    info!(path = %dest_path.display(), size, "source fetched");
    Ok(dest_path)
  }
}

/// Write `bytes` to a private temporary file in `dir` and rename it to
/// `dest`. Concurrent fetches of one URL each write their own file.
fn persist_download(dir: &Path, dest: &Path, bytes: &[u8]) -> Result<(), FetchError> {
  let mut file = tempfile::Builder::new()
    .prefix(".download")
    .tempfile_in(dir)
    .map_err(io_at(dir))?;
  file.write_all(bytes).map_err(io_at(dest))?;
  file.as_file().sync_all().map_err(io_at(dest))?;
  file.persist(dest).map_err(|e| FetchError::Io {
    path: dest.to_path_buf(),
    source: e.error,
  })?;
  Ok(())
}

/// The local file behind a `file://` URL or a bare path.
fn local_path(url: &str) -> Option<PathBuf> {
  if let Some(path) = url.strip_prefix("file://") {
    return Some(PathBuf::from(path));
  }
  if url.contains("://") {
    return None;
  }
  Some(PathBuf::from(url))
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to a hash of
/// the URL if no usable name remains.
pub fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  format!("download_{}", &hex::encode(hasher.finalize())[..16])
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn checksum_of(bytes: &[u8]) -> Checksum {
    Checksum::sha256(&hex::encode(Sha256::digest(bytes)))
  }

  #[test]
  fn url_to_filename_simple() {
    assert_eq!(url_to_filename("https://example.com/file.tar.gz"), "file.tar.gz");
    assert_eq!(url_to_filename("https://example.com/file.tar.gz?token=abc"), "file.tar.gz");
    assert_eq!(url_to_filename("https://example.com/file name.tar.gz"), "file_name.tar.gz");
  }

  #[test]
  fn url_to_filename_fallback_for_empty() {
    assert!(url_to_filename("https://example.com/").starts_with("download_"));
  }

  #[test]
  fn local_paths_are_recognized() {
    assert_eq!(local_path("file:///tmp/a.tar.gz"), Some(PathBuf::from("/tmp/a.tar.gz")));
    assert_eq!(local_path("/tmp/a.tar.gz"), Some(PathBuf::from("/tmp/a.tar.gz")));
    assert_eq!(local_path("https://example.com/a.tar.gz"), None);
  }

  #[tokio::test]
  async fn fetches_local_file_and_verifies() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("hello-1.0.tar.gz");
    std::fs::write(&source, b"payload").unwrap();
    let url = format!("file://{}", source.display());

    let fetched = HttpFetcher::new()
      .fetch(&url, &checksum_of(b"payload"), &temp.path().join("cache"))
      .await
      .unwrap();

    assert_eq!(fetched, temp.path().join("cache/hello-1.0.tar.gz"));
    assert_eq!(std::fs::read(&fetched).unwrap(), b"payload");
  }

  #[tokio::test]
  async fn checksum_mismatch_is_reported_and_nothing_is_cached() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("x.tar.gz");
    std::fs::write(&source, b"tampered").unwrap();

    let err = HttpFetcher::new()
      .fetch(source.to_str().unwrap(), &checksum_of(b"original"), &temp.path().join("cache"))
      .await
      .unwrap_err();

    assert!(matches!(err, FetchError::ChecksumMismatch { .. }));
    assert!(!temp.path().join("cache/x.tar.gz").exists());
  }

  #[tokio::test]
  async fn verified_cache_is_reused() {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    std::fs::create_dir_all(&cache).unwrap();
    std::fs::write(cache.join("gone.tar.gz"), b"cached").unwrap();

    let fetched = HttpFetcher::new()
      .fetch(
        temp.path().join("gone.tar.gz").to_str().unwrap(),
        &checksum_of(b"cached"),
        &cache,
      )
      .await
      .unwrap();

    assert_eq!(std::fs::read(fetched).unwrap(), b"cached");
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_fetches_of_one_url_do_not_collide() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("big-1.0.tar.gz");
    let payload = vec![7u8; 4 << 20];
    std::fs::write(&source, &payload).unwrap();
    let url = source.display().to_string();
    let checksum = checksum_of(&payload);
    let cache = temp.path().join("cache");

    let fetcher = HttpFetcher::new();
    let (a, b, c) = tokio::join!(
      fetcher.fetch(&url, &checksum, &cache),
      fetcher.fetch(&url, &checksum, &cache),
      fetcher.fetch(&url, &checksum, &cache),
    );
    for fetched in [a, b, c] {
      assert_eq!(std::fs::read(fetched.unwrap()).unwrap(), payload);
    }
    let names: Vec<_> = std::fs::read_dir(&cache).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(names, vec![std::ffi::OsString::from("big-1.0.tar.gz")]);
  }

  #[tokio::test]
  async fn missing_local_source_fails() {
    let temp = TempDir::new().unwrap();
    let err = HttpFetcher::new()
      .fetch("/nonexistent/src.tar.gz", &checksum_of(b""), temp.path())
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::FetchFailed { .. }));
  }
}
