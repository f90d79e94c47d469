//! Remote artifact storage.
//!
//! Model artifacts can mirror into a key-value blob store; keys follow the
//! local relative path under the models root. Components never read blobs
//! directly: loading "from remote" downloads into the local layout first,
//! then reads locally. Transfers get bounded retry with backoff since blob
//! endpoints fail transiently; programmer errors never reach this layer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

/// Key-value blob interface for model artifacts.
pub trait BlobStore {
    fn download(&self, key: &str, destination: &Path) -> anyhow::Result<()>;
    fn upload(&self, source: &Path, key: &str) -> anyhow::Result<()>;
    /// Whether a blob exists under `key`. Lets callers tell a legitimately
    /// absent artifact from a transient failure, which would be retried.
    fn exists(&self, key: &str) -> anyhow::Result<bool>;
}

/// Directory-backed [`BlobStore`]; keys become relative paths under a root.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BlobStore for LocalBlobStore {
    fn download(&self, key: &str, destination: &Path) -> anyhow::Result<()> {
        let source = self.root.join(key);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&source, destination)
            .with_context(|| format!("downloading blob {key}"))?;
        Ok(())
    }

    fn upload(&self, source: &Path, key: &str) -> anyhow::Result<()> {
        let destination = self.root.join(key);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, &destination)
            .with_context(|| format!("uploading blob {key}"))?;
        Ok(())
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.root.join(key).is_file())
    }
}

/// Retry policy for blob transfers.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, initial_backoff: Duration::from_millis(200) }
    }
}

fn with_retry<T>(
    policy: RetryPolicy,
    operation: &str,
    mut f: impl FnMut() -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let mut backoff = policy.initial_backoff;
    let attempts = policy.attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < attempts {
                    tracing::warn!(%operation, attempt, error = %err, "blob transfer failed, retrying");
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("{operation} failed")))
}

/// Download one blob into the local layout, retrying transient failures.
pub fn download_with_retry(
    store: &dyn BlobStore,
    key: &str,
    destination: &Path,
    policy: RetryPolicy,
) -> anyhow::Result<()> {
    with_retry(policy, key, || store.download(key, destination))
}

/// Upload one artifact, retrying transient failures.
pub fn upload_with_retry(
    store: &dyn BlobStore,
    source: &Path,
    key: &str,
    policy: RetryPolicy,
) -> anyhow::Result<()> {
    with_retry(policy, key, || store.upload(source, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_local_store_round_trip() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(remote.path());

        let artifact = local.path().join("model.json");
        std::fs::write(&artifact, "{}").unwrap();
        store.upload(&artifact, "idx/matcher/final-model.json").unwrap();

        let fetched = local.path().join("fetched.json");
        store.download("idx/matcher/final-model.json", &fetched).unwrap();
        assert_eq!(std::fs::read_to_string(fetched).unwrap(), "{}");
    }

    #[test]
    fn test_exists_reflects_uploaded_keys() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(remote.path());
        assert!(!store.exists("idx/ranker/classifier_a.json").unwrap());

        let artifact = local.path().join("model.json");
        std::fs::write(&artifact, "{}").unwrap();
        store.upload(&artifact, "idx/ranker/classifier_a.json").unwrap();
        assert!(store.exists("idx/ranker/classifier_a.json").unwrap());
    }

    #[test]
    fn test_retry_recovers_from_transient_failure() {
        struct Flaky(AtomicUsize);
        impl BlobStore for Flaky {
            fn download(&self, _key: &str, _destination: &Path) -> anyhow::Result<()> {
                if self.0.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient");
                }
                Ok(())
            }
            fn upload(&self, _source: &Path, _key: &str) -> anyhow::Result<()> {
                Ok(())
            }
            fn exists(&self, _key: &str) -> anyhow::Result<bool> {
                Ok(true)
            }
        }
        let store = Flaky(AtomicUsize::new(0));
        let policy = RetryPolicy { attempts: 3, initial_backoff: Duration::from_millis(1) };
        download_with_retry(&store, "k", Path::new("/dev/null"), policy).unwrap();
        assert_eq!(store.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_gives_up_after_budget() {
        struct AlwaysFails;
        impl BlobStore for AlwaysFails {
            fn download(&self, _key: &str, _destination: &Path) -> anyhow::Result<()> {
                anyhow::bail!("unreachable endpoint")
            }
            fn upload(&self, _source: &Path, _key: &str) -> anyhow::Result<()> {
                anyhow::bail!("unreachable endpoint")
            }
            fn exists(&self, _key: &str) -> anyhow::Result<bool> {
                Ok(true)
            }
        }
        let policy = RetryPolicy { attempts: 2, initial_backoff: Duration::from_millis(1) };
        let err = download_with_retry(&AlwaysFails, "k", Path::new("/dev/null"), policy);
        assert!(err.is_err());
    }
}
