use super::{ManifestError, is_huggingface_url};
use std::path::{Path, PathBuf};
use url::Url;

/// Where manifest text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Remote(String),
    File(PathBuf),
}

impl ManifestSource {
    /// Remote URL when given, otherwise `<root>/download_list.txt` if it exists.
    pub fn resolve(remote: Option<&str>, root: &Path) -> Option<Self> {
        if let Some(url) = remote.filter(|u| !u.trim().is_empty()) {
            return Some(ManifestSource::Remote(url.trim().to_string()));
        }
        let local = root.join(super::DEFAULT_MANIFEST_FILE);
        local.is_file().then_some(ManifestSource::File(local))
    }

    /// The token to send with the fetch: only remote Hugging Face sources get one.
    pub fn bearer<'a>(&self, token: Option<&'a str>) -> Option<&'a str> {
        match self {
            ManifestSource::Remote(url) if is_huggingface_url(url) => token,
            _ => None,
        }
    }

    /// Read the manifest text. Remote fetches send `bearer` when present.
    pub async fn load(
        &self,
        client: &reqwest::Client,
        bearer: Option<&str>,
    ) -> Result<String, ManifestError> {
        match self {
            ManifestSource::Remote(url) => fetch_remote(client, url, bearer).await,
            ManifestSource::File(path) => {
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ManifestError::Read {
                        path: path.clone(),
                        source,
                    })
            }
        }
    }
}

/// Rewrite `pastebin.com/<id>` share links to their raw form. Other URLs pass through.
pub fn pastebin_raw_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let is_pastebin = parsed
        .host_str()
        .is_some_and(|h| h == "pastebin.com" || h.ends_with(".pastebin.com"));
    if !is_pastebin || parsed.path().starts_with("/raw/") {
        return url.to_string();
    }
    let raw_path = format!("/raw{}", parsed.path());
    parsed.set_path(&raw_path);
    parsed.to_string()
}

/// GET a remote manifest.
pub async fn fetch_remote(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
) -> Result<String, ManifestError> {
    let url = pastebin_raw_url(url);
    tracing::info!("Fetching manifest from {}", url);

    let mut request = client.get(&url);
    if let Some(token) = bearer.filter(|t| !t.is_empty()) {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;

    if !response.status().is_success() {
        return Err(ManifestError::Status {
            status: response.status().as_u16(),
            url,
        });
    }
    Ok(response.text().await?)
}
