//! # Asset Manifest
//!
//! A manifest is a small line-oriented text file listing assets to download, grouped
//! by category:
//!
//! ```text
//! // comment
//! #checkpoints
//! https://huggingface.co/a/resolve/main/model.safetensors, https://civitai.com/api/download/models/1 | anime
//! #extensions
//! https://github.com/ltdrdata/ComfyUI-Manager
//! #lora
//! fuse:/kaggle/input/my-loras
//! ```
//!
//! - Blank lines are skipped; lines starting with `//` are comments.
//! - `#name` opens category `name` (trimmed, lowercased). Repeating a header appends.
//! - Every other line is split on `,` and each non-empty item is appended to the open
//!   category. Items before the first header are dropped.
//!
//! [`resolve`] maps category keys onto [`AssetCategory`] and a destination directory
//! for the UI being installed. Keys with no destination produce a
//! [`ManifestCategoryWarning`] and are skipped; the rest are still processed.

mod category;
mod entry;
mod remote;

pub use category::{AssetCategory, UiLayout};
pub use entry::{MODEL_EXTENSIONS, ManifestEntry, apply_api_key, is_huggingface_url, url_filename};
pub use remote::{ManifestSource, fetch_remote, pastebin_raw_url};

use crate::platform::UiFlavor;
use std::{collections::BTreeMap, path::PathBuf};
use thiserror::Error;

/// Manifest looked for in the platform root when no remote URL is given.
pub const DEFAULT_MANIFEST_FILE: &str = "download_list.txt";

/// Category key to raw entries, as written in the file.
pub type Manifest = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to fetch manifest: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Manifest request to {url} returned HTTP {status}")]
    Status { status: u16, url: String },

    #[error("Failed to read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A manifest category that has nowhere to go for the current UI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Warning: Category '{key}' from the file is not found in {flavor} asset directories.")]
pub struct ManifestCategoryWarning {
    pub key: String,
    pub flavor: UiFlavor,
    pub dropped_entries: usize,
}

/// Parse manifest text into category → entries.
pub fn parse_manifest(content: &str) -> Manifest {
    let mut manifest = Manifest::new();
    let mut key: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        if let Some(header) = line.strip_prefix('#') {
            let name = header.trim().to_lowercase();
            manifest.entry(name.clone()).or_default();
            key = Some(name);
            continue;
        }
        let Some(key) = &key else {
            tracing::debug!("Dropping manifest line before any category: {}", line);
            continue;
        };
        let items = line
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string);
        manifest.entry(key.clone()).or_default().extend(items);
    }

    manifest
}

/// Entries of one category with their destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGroup {
    pub key: String,
    pub category: AssetCategory,
    pub destination: PathBuf,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedManifest {
    pub groups: Vec<ResolvedGroup>,
    pub warnings: Vec<ManifestCategoryWarning>,
}

impl ResolvedManifest {
    pub fn entry_count(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }
}

/// Map every category onto `layout`, applying the CivitAI key to URLs.
pub fn resolve(manifest: &Manifest, layout: &UiLayout, civitai_api_key: Option<&str>) -> ResolvedManifest {
    let mut resolved = ResolvedManifest::default();

    for (key, raw_entries) in manifest {
        let destination = AssetCategory::from_key(key)
            .and_then(|category| layout.destination(category).map(|dst| (category, dst)));

        let Some((category, destination)) = destination else {
            let warning = ManifestCategoryWarning {
                key: key.clone(),
                flavor: layout.flavor(),
                dropped_entries: raw_entries.len(),
            };
            tracing::warn!("{}", warning);
            resolved.warnings.push(warning);
            continue;
        };

        let entries = raw_entries
            .iter()
            .map(|raw| {
                ManifestEntry::parse(raw).map_url(|url| apply_api_key(url, civitai_api_key))
            })
            .collect();

        resolved.groups.push(ResolvedGroup {
            key: key.clone(),
            category,
            destination,
            entries,
        });
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_example() {
        let manifest = parse_manifest("#checkpoints\nurlA, urlB\n//comment\n#loras\nurlC");
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest["checkpoints"], ["urlA", "urlB"]);
        assert_eq!(manifest["loras"], ["urlC"]);
    }

    #[test]
    fn test_leading_line_dropped() {
        let manifest = parse_manifest("orphan\n#vae\nv1");
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest["vae"], ["v1"]);
    }

    #[test]
    fn test_comments_blank_lines_and_case() {
        let manifest = parse_manifest("\n// skip me\n  #LoRA  \r\n a ,, b \r\n\n");
        assert_eq!(manifest["lora"], ["a", "b"]);
    }

    #[test]
    fn test_repeated_header_appends() {
        let manifest = parse_manifest("#vae\na\n#lora\nb\n#vae\nc");
        assert_eq!(manifest["vae"], ["a", "c"]);
    }

    #[test]
    fn test_empty_header_kept_as_empty_category() {
        let manifest = parse_manifest("#embeddings\n#vae\nx");
        assert!(manifest["embeddings"].is_empty());
    }

    #[test]
    fn test_resolve_warns_and_continues() {
        let manifest = parse_manifest("#unknown_category\nu1\n#vae\nhttps://x.io/v.pt");
        let layout = UiLayout::new(UiFlavor::ComfyUi, "/content/ComfyUI");
        let resolved = resolve(&manifest, &layout, None);

        assert_eq!(resolved.warnings.len(), 1);
        assert_eq!(resolved.warnings[0].key, "unknown_category");
        assert_eq!(resolved.warnings[0].dropped_entries, 1);
        assert_eq!(resolved.groups.len(), 1);
        assert_eq!(resolved.groups[0].category, AssetCategory::Vae);
        assert_eq!(
            resolved.groups[0].destination,
            PathBuf::from("/content/ComfyUI/models/vae")
        );
    }

    #[test]
    fn test_resolve_flavor_without_destination() {
        let manifest = parse_manifest("#gligen\nhttps://x.io/g.pt");
        let layout = UiLayout::new(UiFlavor::Sdw, "/home/sdw");
        let resolved = resolve(&manifest, &layout, None);
        assert!(resolved.groups.is_empty());
        assert_eq!(
            resolved.warnings[0].to_string(),
            "Warning: Category 'gligen' from the file is not found in sdw asset directories."
        );
    }

    #[test]
    fn test_resolve_applies_api_key() {
        let manifest = parse_manifest("#model\nhttps://civitai.com/api/download/models/7 | seven");
        let layout = UiLayout::new(UiFlavor::Sdw, "/home/sdw");
        let resolved = resolve(&manifest, &layout, Some("secret"));
        assert_eq!(
            resolved.groups[0].entries,
            [ManifestEntry::Named {
                url: "https://civitai.com/api/download/models/7?ApiKey=secret".into(),
                filename: "seven".into(),
            }]
        );
        assert_eq!(resolved.entry_count(), 1);
    }
}
