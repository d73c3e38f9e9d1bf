// SPDX-License-Identifier: GPL-3.0-only
use anyhow::{Context, Result};
use url::Url;

/// Maximum allowed URL length
const MAX_URL_LENGTH: usize = 2048;

/// Validate a URL taken from a feed response before downloading from it.
///
/// Checks:
/// - Only allows http/https schemes
/// - Requires a host
/// - Validates URL length
pub fn validate_download_url(url_str: &str) -> Result<Url> {
    if url_str.len() > MAX_URL_LENGTH {
        return Err(anyhow::anyhow!(
            "URL exceeds maximum length of {} characters",
            MAX_URL_LENGTH
        ));
    }

    let url = Url::parse(url_str).context("Invalid URL format")?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(anyhow::anyhow!(
                "Invalid URL scheme: {} (only http and https are allowed)",
                scheme
            ));
        }
    }

    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(anyhow::anyhow!("URL must have a host"));
    }

    Ok(url)
}

/// Resolve a CI artifact's relative path against the artifact base URL.
pub fn join_artifact_url(base: &str, relative_path: &str) -> Result<Url> {
    let mut base = validate_download_url(base)?;
    // Without a trailing slash `join` would replace the last segment
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let joined = base
        .join(relative_path.trim_start_matches('/'))
        .with_context(|| format!("Invalid artifact path: {}", relative_path))?;
    validate_download_url(joined.as_str())
}
