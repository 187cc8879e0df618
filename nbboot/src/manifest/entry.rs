use url::Url;

/// Extensions accepted as-is on an explicit `| filename`.
pub const MODEL_EXTENSIONS: [&str; 4] = [".safetensors", ".ckpt", ".pt", ".pth"];

const FUSE_PREFIX: &str = "fuse:";

/// One comma-separated item from a manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    /// Bare URL; the file name comes from the URL or the server.
    Url { url: String },
    /// `URL | filename`
    Named { url: String, filename: String },
    /// `fuse:<path>`, a local file or directory linked into the destination.
    Fuse { path: String },
}

impl ManifestEntry {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(path) = raw.strip_prefix(FUSE_PREFIX) {
            return ManifestEntry::Fuse {
                path: path.trim().to_string(),
            };
        }
        match raw.split_once('|') {
            Some((url, filename)) if !filename.trim().is_empty() => {
                let url = url.trim().to_string();
                let filename = complete_filename(filename.trim(), &url);
                ManifestEntry::Named { url, filename }
            }
            Some((url, _)) => ManifestEntry::Url {
                url: url.trim().to_string(),
            },
            None => ManifestEntry::Url {
                url: raw.to_string(),
            },
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ManifestEntry::Url { url } | ManifestEntry::Named { url, .. } => Some(url),
            ManifestEntry::Fuse { .. } => None,
        }
    }

    /// Target file name. `None` for bare URLs whose path has no usable last segment,
    /// in which case the downloader takes the name from the response.
    pub fn filename(&self) -> Option<String> {
        match self {
            ManifestEntry::Named { filename, .. } => Some(filename.clone()),
            ManifestEntry::Url { url } => url_filename(url).filter(|name| name.contains('.')),
            ManifestEntry::Fuse { .. } => None,
        }
    }

    /// Apply `f` to the URL, leaving fuse entries untouched.
    pub fn map_url(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            ManifestEntry::Url { url } => ManifestEntry::Url { url: f(url) },
            ManifestEntry::Named { url, filename } => ManifestEntry::Named {
                url: f(url),
                filename,
            },
            fuse @ ManifestEntry::Fuse { .. } => fuse,
        }
    }
}

/// Last non-empty path segment of `url`, percent-decoded.
pub fn url_filename(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment).ok()?.into_owned();
    (!decoded.is_empty()).then_some(decoded)
}

/// Append the URL file's extension unless `filename` already has a model extension.
fn complete_filename(filename: &str, url: &str) -> String {
    if MODEL_EXTENSIONS.iter().any(|ext| filename.ends_with(ext)) {
        return filename.to_string();
    }
    let extension = url_filename(url)
        .and_then(|name| name.rfind('.').map(|idx| name[idx..].to_string()))
        .unwrap_or_default();
    format!("{filename}{extension}")
}

/// True when the URL's host is `domain` or one of its subdomains. Query strings and
/// paths never count, so credentials keyed on a host only go to that host.
fn host_is(url: &Url, domain: &str) -> bool {
    url.host_str().is_some_and(|host| {
        host == domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Whether `url` points at Hugging Face, the only host that receives the bearer token.
pub fn is_huggingface_url(url: &str) -> bool {
    Url::parse(url).is_ok_and(|parsed| host_is(&parsed, "huggingface.co"))
}

/// Add `ApiKey=<key>` to CivitAI URLs.
pub fn apply_api_key(url: String, api_key: Option<&str>) -> String {
    let Some(key) = api_key.filter(|k| !k.is_empty()) else {
        return url;
    };
    let Ok(mut parsed) = Url::parse(&url) else {
        return url;
    };
    if !host_is(&parsed, "civitai.com") || parsed.query_pairs().any(|(k, _)| k == "ApiKey") {
        return url;
    }
    parsed.query_pairs_mut().append_pair("ApiKey", key);
    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            ManifestEntry::parse(" https://x.io/a.safetensors "),
            ManifestEntry::Url {
                url: "https://x.io/a.safetensors".into()
            }
        );
        assert_eq!(
            ManifestEntry::parse("https://x.io/a.safetensors | mine"),
            ManifestEntry::Named {
                url: "https://x.io/a.safetensors".into(),
                filename: "mine.safetensors".into()
            }
        );
        assert_eq!(
            ManifestEntry::parse("fuse:/kaggle/input/models"),
            ManifestEntry::Fuse {
                path: "/kaggle/input/models".into()
            }
        );
    }

    #[test]
    fn test_named_with_model_extension_kept() {
        let entry = ManifestEntry::parse("https://x.io/file.bin|keep.ckpt");
        assert_eq!(entry.filename().as_deref(), Some("keep.ckpt"));
        let entry = ManifestEntry::parse("https://x.io/file.bin|weights.pth");
        assert_eq!(entry.filename().as_deref(), Some("weights.pth"));
    }

    #[test]
    fn test_named_without_extension_on_url() {
        let entry = ManifestEntry::parse("https://civitai.com/api/download/models/123 | anime");
        assert_eq!(entry.filename().as_deref(), Some("anime"));
    }

    #[test]
    fn test_bare_url_filename() {
        let entry = ManifestEntry::parse("https://hf.co/r/resolve/main/my%20vae.pt?download=true");
        assert_eq!(entry.filename().as_deref(), Some("my vae.pt"));
        let entry = ManifestEntry::parse("https://civitai.com/api/download/models/123");
        assert_eq!(entry.filename(), None);
    }

    #[test]
    fn test_api_key_applied_to_civitai_only() {
        assert_eq!(
            apply_api_key("https://civitai.com/api/download/models/1".into(), Some("k")),
            "https://civitai.com/api/download/models/1?ApiKey=k"
        );
        assert_eq!(
            apply_api_key("https://civitai.com/api/download/models/1?type=Model".into(), Some("k")),
            "https://civitai.com/api/download/models/1?type=Model&ApiKey=k"
        );
        assert_eq!(
            apply_api_key("https://huggingface.co/a.pt".into(), Some("k")),
            "https://huggingface.co/a.pt"
        );
        assert_eq!(
            apply_api_key("https://civitai.com/m/1".into(), None),
            "https://civitai.com/m/1"
        );
    }

    #[test]
    fn test_api_key_not_duplicated() {
        let url = "https://civitai.com/m/1?ApiKey=old".to_string();
        assert_eq!(apply_api_key(url.clone(), Some("new")), url);
    }

    #[test]
    fn test_credentials_follow_the_host_not_the_query() {
        assert!(is_huggingface_url("https://huggingface.co/org/repo/resolve/main/a.safetensors"));
        assert!(is_huggingface_url("https://cdn-lfs.huggingface.co/x"));
        assert!(!is_huggingface_url("https://evil.example/?huggingface.co"));
        assert!(!is_huggingface_url("https://nothuggingface.co/a"));
        assert!(!is_huggingface_url("huggingface.co/no-scheme"));

        let url = "https://evil.example/list?civitai.com".to_string();
        assert_eq!(apply_api_key(url.clone(), Some("k")), url);
    }

    #[test]
    fn test_map_url_skips_fuse() {
        let fuse = ManifestEntry::parse("fuse:/data");
        assert_eq!(fuse.clone().map_url(|u| u + "!"), fuse);
    }
}
