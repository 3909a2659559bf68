//! Firmware downloader: a streaming HTTP GET into the cache directory
//! with progress events, one level of redirect following, and
//! cooperative cancellation.
//!
//! Grounded on the project's existing `reqwest`-based firmware download
//! command, generalized from a one-shot `bytes()` read into a streamed
//! write so progress can be reported and a download can be cancelled
//! mid-transfer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::{CoreError, CoreResult};
use crate::flash::progress::{FlashStage, ProgressEvent, ProgressSink};

pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    /// Known final size, if the caller already has it from release
    /// metadata; used as a progress-percentage denominator when the
    /// response omits `Content-Length`.
    pub expected_size: Option<u64>,
}

fn partial_path(destination: &std::path::Path) -> PathBuf {
    let mut name = destination.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    destination.with_file_name(name)
}

async fn download_inner(
    request: &DownloadRequest,
    cancel: &AtomicBool,
    progress: &mut impl ProgressSink,
) -> CoreResult<()> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| CoreError::Network(e.to_string()))?;

    let mut url = request.url.clone();
    let mut response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| CoreError::Network(e.to_string()))?;

    // Follow exactly one level of redirect.
    if matches!(response.status().as_u16(), 301 | 302) {
        url = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CoreError::Network("redirect missing Location header".to_string()))?
            .to_string();
        response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;
    }

    if !response.status().is_success() {
        return Err(CoreError::Network(format!(
            "download failed with status {}",
            response.status()
        )));
    }

    let total = response
        .content_length()
        .or(request.expected_size)
        .unwrap_or(0);

    let partial = partial_path(&request.destination);
    if let Some(parent) = request.destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(&partial).await?;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        if cancel.load(Ordering::Acquire) {
            return Err(CoreError::Aborted);
        }
        let chunk = chunk.map_err(|e| CoreError::Network(e.to_string()))?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        let pct = if total == 0 {
            0
        } else {
            ((downloaded * 100) / total).min(100) as u8
        };
        progress.emit(
            ProgressEvent::new(FlashStage::Downloading, pct, "downloading firmware")
                .with_bytes(downloaded, total),
        );
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial, &request.destination).await?;
    Ok(())
}

/// Download `request.url` into `request.destination`, reporting progress
/// through `progress` and checking `cancel` between chunks. On any
/// failure (network error, cancellation, I/O) the partially-written file
/// is removed before the error is returned.
pub async fn download(
    request: DownloadRequest,
    cancel: &AtomicBool,
    mut progress: impl ProgressSink,
) -> CoreResult<()> {
    let partial = partial_path(&request.destination);
    let result = download_inner(&request, cancel, &mut progress).await;
    if result.is_err() {
        tokio::fs::remove_file(&partial).await.ok();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_path_appends_part_suffix() {
        let dest = PathBuf::from("/tmp/cache/0483_df11_1_0_0.hex");
        assert_eq!(partial_path(&dest), PathBuf::from("/tmp/cache/0483_df11_1_0_0.hex.part"));
    }
}
