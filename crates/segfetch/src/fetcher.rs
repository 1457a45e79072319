//! Single-file segment fetch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use stream_common::StopSignal;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::error::FetchError;
use crate::playlist::SegmentJob;

const PARTIAL_SUFFIX: &str = ".part";

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Download `job` into `dir/<job.file>`.
///
/// The body is streamed into a `.part` file that is renamed once complete.
/// On error or stop the partial file is removed, so the directory only ever
/// holds whole files. Returns the number of bytes written.
pub async fn fetch_segment(
    client: &Client,
    job: &SegmentJob,
    dir: &Path,
    timeout: Duration,
    stop: &StopSignal,
) -> Result<u64, FetchError> {
    if stop.is_stopped() {
        return Err(FetchError::Cancelled);
    }
    let target = dir.join(&job.file);
    let partial = partial_path(&target);

    let result = stream_to(client, job, &partial, timeout, stop).await;
    match result {
        Ok(written) => {
            tokio::fs::rename(&partial, &target)
                .await
                .map_err(|e| FetchError::path_io(&target, e))?;
            trace!(file = %job.file, bytes = written, "segment stored");
            Ok(written)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

async fn stream_to(
    client: &Client,
    job: &SegmentJob,
    partial: &Path,
    timeout: Duration,
    stop: &StopSignal,
) -> Result<u64, FetchError> {
    let request = client.get(&job.url).timeout(timeout).send();
    let response = tokio::select! {
        _ = stop.stopped() => return Err(FetchError::Cancelled),
        response = request => response?,
    };
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::http_status(status, &job.url, "segment"));
    }

    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| FetchError::path_io(partial, e))?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    loop {
        if stop.is_stopped() {
            return Err(FetchError::Cancelled);
        }
        let chunk = tokio::select! {
            _ = stop.stopped() => return Err(FetchError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| FetchError::path_io(partial, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| FetchError::path_io(partial, e))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_name_keeps_extension() {
        assert_eq!(
            partial_path(Path::new("/tmp/w/12.ts")),
            PathBuf::from("/tmp/w/12.ts.part")
        );
    }
}
