//! Monthly TLC trip file download.
//!
//! Files come from the TLC `CloudFront` mirror and are streamed to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::{Stream, StreamExt as _};
use taxi_map_pipeline_models::progress::ProgressCallback;
use tokio::io::AsyncWriteExt as _;

use crate::TripError;

/// Base URL of the TLC trip data mirror.
pub const TRIP_DATA_BASE_URL: &str = "https://d37ci6vzurychx.cloudfront.net/trip-data";

/// File name of the yellow-cab trip file for one month.
///
/// # Errors
///
/// Returns [`TripError::Invalid`] if `year`/`month` is not a calendar month.
pub fn trip_file_name(year: i32, month: u32) -> Result<String, TripError> {
    let date = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| TripError::Invalid {
        message: format!("{year}-{month} is not a valid month"),
    })?;
    Ok(format!("yellow_tripdata_{}.parquet", date.format("%Y-%m")))
}

/// Download URL of the yellow-cab trip file for one month.
///
/// # Errors
///
/// Returns [`TripError::Invalid`] if `year`/`month` is not a calendar month.
pub fn trip_url(year: i32, month: u32) -> Result<String, TripError> {
    Ok(format!("{TRIP_DATA_BASE_URL}/{}", trip_file_name(year, month)?))
}

/// Downloads one month of trips into `dest_dir` and returns the file path.
/// An existing file is replaced only once the transfer completes. `progress`
/// counts bytes.
///
/// # Errors
///
/// Returns [`TripError::Invalid`] for an invalid month,
/// [`TripError::HttpStatus`] for a non-success response, or
/// [`TripError::Http`]/[`TripError::Io`] if the transfer fails.
pub async fn download_trip_month(
    year: i32,
    month: u32,
    dest_dir: &Path,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<PathBuf, TripError> {
    let url = trip_url(year, month)?;
    let dest = dest_dir.join(trip_file_name(year, month)?);

    log::info!("Downloading {url}");
    log::info!("  -> {}", dest.display());

    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| TripError::io(dest_dir, e))?;

    let client = reqwest::Client::builder()
        .user_agent("taxi-map/0.1")
        .build()?;

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(TripError::HttpStatus {
            url,
            status: response.status().as_u16(),
        });
    }

    let total_size = response.content_length();
    if let Some(size) = total_size {
        #[allow(clippy::cast_precision_loss)]
        let mb = size as f64 / 1_048_576.0;
        log::info!("  file size: {mb:.1} MB");
        progress.set_total(size);
    }

    let downloaded = stream_to_file(response.bytes_stream(), &dest, total_size, progress).await?;

    #[allow(clippy::cast_precision_loss)]
    let mb = downloaded as f64 / 1_048_576.0;
    log::info!("  download complete: {mb:.1} MB");
    progress.finish(format!("{} ({mb:.1} MB)", dest.display()));

    Ok(dest)
}

/// Sibling path a download is written to before it is renamed into place.
#[must_use]
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dest.with_file_name(name)
}

/// Writes `stream` to [`partial_path`] and renames it to `dest` once the
/// stream ends. On failure the partial file is removed and `dest` is left
/// untouched. Returns the number of bytes written.
async fn stream_to_file<S, B, E>(
    stream: S,
    dest: &Path,
    total_size: Option<u64>,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<u64, TripError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<TripError>,
{
    let tmp = partial_path(dest);
    match write_partial(stream, &tmp, total_size, progress).await {
        Ok(downloaded) => {
            tokio::fs::rename(&tmp, dest)
                .await
                .map_err(|e| TripError::io(dest, e))?;
            Ok(downloaded)
        }
        Err(e) => {
            if let Err(remove) = tokio::fs::remove_file(&tmp).await {
                log::warn!("Failed to remove {}: {remove}", tmp.display());
            }
            Err(e)
        }
    }
}

async fn write_partial<S, B, E>(
    stream: S,
    tmp: &Path,
    total_size: Option<u64>,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<u64, TripError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<TripError>,
{
    let mut stream = std::pin::pin!(stream);
    let mut file = tokio::fs::File::create(tmp)
        .await
        .map_err(|e| TripError::io(tmp, e))?;

    let mut downloaded: u64 = 0;
    let mut last_log_mb: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::<TripError>::into)?;
        let chunk = chunk.as_ref();
        file.write_all(chunk)
            .await
            .map_err(|e| TripError::io(tmp, e))?;
        downloaded += chunk.len() as u64;
        progress.inc(chunk.len() as u64);

        // Every 25 MB
        let current = downloaded / (25 * 1_048_576);
        if current > last_log_mb {
            last_log_mb = current;
            #[allow(clippy::cast_precision_loss)]
            let mb = downloaded as f64 / 1_048_576.0;
            if let Some(total) = total_size {
                #[allow(clippy::cast_precision_loss)]
                let pct = (downloaded as f64 / total as f64) * 100.0;
                log::info!("  downloaded {mb:.0} MB ({pct:.0}%)");
            } else {
                log::info!("  downloaded {mb:.0} MB");
            }
        }
    }

    file.flush().await.map_err(|e| TripError::io(tmp, e))?;
    Ok(downloaded)
}
