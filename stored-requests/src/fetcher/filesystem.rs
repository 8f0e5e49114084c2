use super::{FetchError, FetchResult, Fetcher};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Reads stored payloads from `<base>/requests/<id>.json` and
/// `<base>/imps/<id>.json`. A file that does not exist is a missing ID;
/// any other I/O failure fails the batch.
pub struct FilesystemFetcher {
    requests_dir: PathBuf,
    imps_dir: PathBuf,
}

impl FilesystemFetcher {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base = base_dir.as_ref();
        FilesystemFetcher {
            requests_dir: base.join("requests"),
            imps_dir: base.join("imps"),
        }
    }

    async fn read_batch(
        dir: &Path,
        ids: &[String],
        found: &mut HashMap<String, Bytes>,
        missing: &mut Vec<String>,
    ) -> Result<(), FetchError> {
        for id in ids {
            let path = dir.join(format!("{id}.json"));
            match tokio::fs::read(&path).await {
                Ok(data) => {
                    found.insert(id.clone(), Bytes::from(data));
                }
                Err(err) if err.kind() == ErrorKind::NotFound => missing.push(id.clone()),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Fetcher for FilesystemFetcher {
    async fn fetch(
        &self,
        request_ids: &[String],
        imp_ids: &[String],
    ) -> Result<FetchResult, FetchError> {
        let mut result = FetchResult::default();
        Self::read_batch(
            &self.requests_dir,
            request_ids,
            &mut result.requests,
            &mut result.missing_requests,
        )
        .await?;
        Self::read_batch(
            &self.imps_dir,
            imp_ids,
            &mut result.imps,
            &mut result.missing_imps,
        )
        .await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_stored(dir: &Path, category: &str, id: &str, data: &str) {
        let category_dir = dir.join(category);
        std::fs::create_dir_all(&category_dir).unwrap();
        std::fs::write(category_dir.join(format!("{id}.json")), data).unwrap();
    }

    #[tokio::test]
    async fn fetches_files_and_reports_missing_ids() {
        let dir = tempfile::tempdir().unwrap();
        write_stored(dir.path(), "requests", "req-a", r#"{"id":"req-a"}"#);
        write_stored(dir.path(), "imps", "imp-a", r#"{"id":"imp-a"}"#);

        let fetcher = FilesystemFetcher::new(dir.path());
        let result = fetcher
            .fetch(
                &["req-a".to_string(), "req-b".to_string()],
                &["imp-a".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(
            result.requests.get("req-a").unwrap().as_ref(),
            br#"{"id":"req-a"}"#
        );
        assert_eq!(result.missing_requests, vec!["req-b".to_string()]);
        assert_eq!(result.imps.len(), 1);
        assert!(result.missing_imps.is_empty());
    }

    #[tokio::test]
    async fn empty_batches_touch_nothing() {
        let fetcher = FilesystemFetcher::new("/nonexistent");
        let result = fetcher.fetch(&[], &[]).await.unwrap();
        assert_eq!(result, FetchResult::default());
    }
}
