//! Downloads a pre-built canonical-equities artifact from a GitHub
//! release and rebuilds the local store from it.
//!
//! Grounded in the original source's `domain/retrieval/retrieval.py`
//! (reconstructed from `tests/unit/domain/retrieval/test_retrieval.py`,
//! since the implementation file itself was filtered from the pack):
//! look up a release by tag, resolve the named asset's
//! `browser_download_url`, stream it to a `.tmp` file tracking
//! bytes-written against `Content-Length`, then atomically rename into
//! place only if the two agree.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::{Error, Result};

const ASSET_NAME: &str = "canonical_equities.jsonl.gz";

/// Looks up a GitHub release by tag via the REST API. A 404 means the
/// tag doesn't exist (treated as a data error, not a crash); any other
/// non-2xx status is a vendor-transient failure.
async fn get_release_by_tag(client: &Client, owner: &str, repo: &str, tag: &str) -> Result<Value> {
    let url = if tag == "latest" {
        format!("https://api.github.com/repos/{owner}/{repo}/releases/latest")
    } else {
        format!("https://api.github.com/repos/{owner}/{repo}/releases/tags/{tag}")
    };

    let response = client
        .get(&url)
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "equity-aggregator")
        .send()
        .await
        .map_err(Error::VendorTransient)?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(Error::Data(format!(
            "release tag '{tag}' not found in {owner}/{repo}"
        )));
    }

    let response = response.error_for_status().map_err(Error::VendorTransient)?;

    response
        .json::<Value>()
        .await
        .map_err(Error::VendorTransient)
}

/// Finds the `browser_download_url` of the named asset within a release
/// payload as returned by [`get_release_by_tag`].
fn asset_browser_url(release: &Value, asset_name: &str) -> Result<String> {
    release
        .get("assets")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|asset| asset.get("name").and_then(Value::as_str) == Some(asset_name))
        .and_then(|asset| asset.get("browser_download_url"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Data(format!("release has no asset named '{asset_name}'")))
}

/// Streams `url` to a `.tmp` file beside `dest`, returning the bytes
/// written and the `Content-Length` the response advertised (0 if
/// absent, in which case the two trivially match).
async fn download_to_temp(client: &Client, url: &str, dest: &Path) -> Result<(u64, u64)> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(Error::VendorTransient)?
        .error_for_status()
        .map_err(Error::VendorTransient)?;

    let expected = response
        .content_length()
        .or_else(|| {
            response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(0);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Data(e.to_string()))?;
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| Error::Data(e.to_string()))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Error::VendorTransient)?;
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::Data(e.to_string()))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| Error::Data(e.to_string()))?;

    Ok((written, expected))
}

/// Validates a completed temp download against the expected size and,
/// if it matches, renames it into place; otherwise removes the temp
/// file and fails.
fn finalise_download(tmp: &Path, dest: &Path, counts: (u64, u64)) -> Result<PathBuf> {
    let (written, expected) = counts;
    if expected != 0 && written != expected {
        let _ = std::fs::remove_file(tmp);
        return Err(Error::Data(format!(
            "download size mismatch: wrote {written} bytes, expected {expected}"
        )));
    }

    std::fs::rename(tmp, dest).map_err(|e| Error::Data(e.to_string()))?;
    Ok(dest.to_path_buf())
}

/// Downloads `url` to `dest`, validating the transfer completed fully
/// before the file is considered present at `dest`.
async fn stream_download(client: &Client, url: &str, dest: &Path) -> Result<PathBuf> {
    let tmp = dest.with_extension("tmp");
    let counts = download_to_temp(client, url, &tmp).await?;
    finalise_download(&tmp, dest, counts)
}

/// Retrieves the most recent canonical-equities dataset from the
/// configured remote repository and replaces the local store with it.
///
/// Returns the number of canonical equities the rebuilt store holds.
pub async fn download_canonical_equities(config: &Config, client: &Client, cache: &CacheStore) -> Result<usize> {
    let release = get_release_by_tag(
        client,
        &config.release_owner,
        &config.release_repo,
        &config.release_tag,
    )
    .await?;

    let url = asset_browser_url(&release, ASSET_NAME)?;

    let dest = config.export_path();
    info!(url = %url, dest = %dest.display(), "downloading canonical equities artifact");
    stream_download(client, &url, &dest).await?;

    cache.rebuild_from_export(&dest).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn asset_browser_url_returns_expected() {
        let release = json!({
            "assets": [
                {"name": "a.gz", "browser_download_url": "https://example/a.gz"},
            ],
        });

        let url = asset_browser_url(&release, "a.gz").unwrap();
        assert_eq!(url, "https://example/a.gz");
    }

    #[test]
    fn asset_browser_url_raises_when_missing() {
        let release = json!({"assets": [{"name": "b.gz", "browser_download_url": "x"}]});
        assert!(asset_browser_url(&release, "a.gz").is_err());
    }

    #[test]
    fn finalise_download_raises_on_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("y.tmp");
        let dest = dir.path().join("y.bin");
        std::fs::write(&tmp, b"ab").unwrap();

        let result = finalise_download(&tmp, &dest, (2, 3));
        assert!(result.is_err());
        assert!(!tmp.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn finalise_download_renames_on_match() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("y.tmp");
        let dest = dir.path().join("y.bin");
        std::fs::write(&tmp, b"abc").unwrap();

        let result = finalise_download(&tmp, &dest, (3, 3)).unwrap();
        assert_eq!(result, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn download_to_temp_returns_counts_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.tmp");
        let client = Client::new();

        let result = download_to_temp(&client, "http://127.0.0.1:0/unreachable", &dest).await;
        assert!(result.is_err());
    }
}
