//! Multipart upload step

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};

use crate::common::{Error, Result};

/// POST `file` as the multipart field `file` and return the status code
pub async fn upload_file(addr: SocketAddr, path: &str, file: &Path, timeout: Duration) -> Result<u16> {
    let bytes = tokio::fs::read(file)
        .await
        .map_err(|e| Error::file_read(file, e))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let url = format!("http://{}{}", addr, path);
    tracing::debug!("Uploading '{}' ({} bytes) to {}", file.display(), bytes.len(), url);

    let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()?;
    let response = client.post(&url).multipart(form).send().await?;

    Ok(response.status().as_u16())
}
