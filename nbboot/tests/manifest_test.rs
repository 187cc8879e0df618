use nbboot::assets::AssetDownloader;
use nbboot::manifest::{
    AssetCategory, ManifestEntry, ManifestSource, UiLayout, parse_manifest, resolve,
};
use nbboot::platform::UiFlavor;
use std::path::PathBuf;

const SAMPLE: &str = "\
// models for the evening session
#checkpoints
https://huggingface.co/a/resolve/main/base.safetensors, https://civitai.com/api/download/models/11 | anime

#LORA
https://civitai.com/api/download/models/22?type=Model | detail.safetensors
#extensions
https://github.com/ltdrdata/ComfyUI-Manager
#unknown_category
https://example.com/ignored.bin
#vae
fuse:/kaggle/input/vae-pack
";

#[test]
fn test_spec_example_parses() {
    let manifest = parse_manifest("#checkpoints\nurlA, urlB\n//comment\n#loras\nurlC");
    let expected: Vec<(&str, Vec<&str>)> = vec![
        ("checkpoints", vec!["urlA", "urlB"]),
        ("loras", vec!["urlC"]),
    ];
    let actual: Vec<(&str, Vec<&str>)> = manifest
        .iter()
        .map(|(k, v)| (k.as_str(), v.iter().map(String::as_str).collect()))
        .collect();
    assert_eq!(actual, expected);
}

#[test]
fn test_resolve_full_sample_for_comfyui() {
    let manifest = parse_manifest(SAMPLE);
    let layout = UiLayout::new(UiFlavor::ComfyUi, "/content/ComfyUI");
    let resolved = resolve(&manifest, &layout, Some("key"));

    assert_eq!(resolved.warnings.len(), 1);
    assert_eq!(resolved.warnings[0].key, "unknown_category");

    let categories: Vec<_> = resolved.groups.iter().map(|g| g.category).collect();
    assert_eq!(
        categories,
        [
            AssetCategory::Checkpoints,
            AssetCategory::Extensions,
            AssetCategory::Loras,
            AssetCategory::Vae
        ]
    );
    assert_eq!(resolved.entry_count(), 5);

    let checkpoints = &resolved.groups[0];
    assert_eq!(
        checkpoints.entries[1],
        ManifestEntry::Named {
            url: "https://civitai.com/api/download/models/11?ApiKey=key".into(),
            filename: "anime".into(),
        }
    );

    let loras = &resolved.groups[2];
    assert_eq!(loras.destination, PathBuf::from("/content/ComfyUI/models/loras"));
    assert_eq!(
        loras.entries[0].url(),
        Some("https://civitai.com/api/download/models/22?type=Model&ApiKey=key")
    );
}

#[test]
fn test_sample_becomes_commands() {
    let manifest = parse_manifest(SAMPLE);
    let layout = UiLayout::new(UiFlavor::Sdw, "/home/sdw");
    let resolved = resolve(&manifest, &layout, None);
    let downloader = AssetDownloader::new(Some("hf_token".into()));

    let commands: Vec<String> = resolved
        .groups
        .iter()
        .flat_map(|g| downloader.commands_for(g))
        .map(|spec| spec.command)
        .collect();

    assert_eq!(commands.len(), 5);
    assert!(commands[0].contains("-d '/home/sdw/models/Stable-diffusion' -o 'base.safetensors'"));
    assert!(commands[0].contains("Authorization: Bearer hf_token"));
    assert!(!commands[1].contains("Authorization"));
    assert_eq!(
        commands[2],
        "cd '/home/sdw/extensions' && git clone 'https://github.com/ltdrdata/ComfyUI-Manager'"
    );
    assert_eq!(
        commands[4],
        "ln -sfn '/kaggle/input/vae-pack' '/home/sdw/models/VAE/vae-pack'"
    );
}

#[tokio::test]
async fn test_default_manifest_file_is_used() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("download_list.txt"), SAMPLE).unwrap();

    let source = ManifestSource::resolve(None, dir.path()).unwrap();
    let text = source.load(&reqwest::Client::new(), None).await.unwrap();
    assert_eq!(parse_manifest(&text), parse_manifest(SAMPLE));
}
