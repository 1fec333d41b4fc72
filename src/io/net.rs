use crate::error::Result;
use reqwest::blocking::Client;
use std::{
    fs::{self, File},
    io::{Read, Write},
    path::Path,
    time::Duration,
};
use tracing::info;

const PROGRESS_STEP: u64 = 10;

pub fn http_client() -> Result<Client> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60 * 60))
        .build()?;
    Ok(client)
}

/// Streams `url` into `dest` through a `.part` file, logging every 10%.
pub fn download_with_progress(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    let tmp = dest.with_extension("part");

    let mut resp = client.get(url).send()?.error_for_status()?;
    let total = resp.content_length().unwrap_or(0);
    info!(%url, total_bytes = total, "downloading model artifact");

    let mut file = File::create(&tmp)?;
    let mut downloaded: u64 = 0;
    let mut next_report = PROGRESS_STEP;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = resp.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        downloaded += n as u64;

        if total > 0 {
            let percent = downloaded * 100 / total;
            if percent >= next_report {
                info!(percent, downloaded_bytes = downloaded, "model download progress");
                next_report = (percent / PROGRESS_STEP + 1) * PROGRESS_STEP;
            }
        }
    }
    file.flush()?;
    drop(file);

    if dest.exists() {
        fs::remove_file(dest).ok();
    }
    fs::rename(&tmp, dest)?;

    info!(path = %dest.display(), bytes = downloaded, "model artifact stored");
    Ok(downloaded)
}
