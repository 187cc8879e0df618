use crate::platform::UiFlavor;
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Fixed destination buckets for downloaded assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetCategory {
    Checkpoints,
    Clip,
    ClipVision,
    Configs,
    ControlNet,
    Diffusers,
    Embeddings,
    Gligen,
    Hypernetworks,
    Loras,
    StyleModels,
    Unet,
    UpscaleModels,
    Vae,
    VaeApprox,
    /// Git repositories cloned into the UI's plugin directory.
    Extensions,
}

impl AssetCategory {
    pub const ALL: [AssetCategory; 16] = [
        AssetCategory::Checkpoints,
        AssetCategory::Clip,
        AssetCategory::ClipVision,
        AssetCategory::Configs,
        AssetCategory::ControlNet,
        AssetCategory::Diffusers,
        AssetCategory::Embeddings,
        AssetCategory::Gligen,
        AssetCategory::Hypernetworks,
        AssetCategory::Loras,
        AssetCategory::StyleModels,
        AssetCategory::Unet,
        AssetCategory::UpscaleModels,
        AssetCategory::Vae,
        AssetCategory::VaeApprox,
        AssetCategory::Extensions,
    ];

    /// Map a manifest header (already lowercased) to a category.
    pub fn from_key(key: &str) -> Option<Self> {
        let category = match key.trim() {
            "checkpoints" | "checkpoint" | "model" | "models" => AssetCategory::Checkpoints,
            "clip" => AssetCategory::Clip,
            "clip_vision" | "clip_version" => AssetCategory::ClipVision,
            "configs" | "config" => AssetCategory::Configs,
            "controlnet" => AssetCategory::ControlNet,
            "diffusers" => AssetCategory::Diffusers,
            "embeddings" | "embedding" => AssetCategory::Embeddings,
            "gligen" => AssetCategory::Gligen,
            "hypernetworks" | "hypernetwork" => AssetCategory::Hypernetworks,
            "loras" | "lora" => AssetCategory::Loras,
            "style_models" | "style_model" => AssetCategory::StyleModels,
            "unet" => AssetCategory::Unet,
            "upscale_models" | "upscale_model" => AssetCategory::UpscaleModels,
            "vae" => AssetCategory::Vae,
            "vae_approx" => AssetCategory::VaeApprox,
            "extensions" | "extension" | "custom_nodes" => AssetCategory::Extensions,
            _ => return None,
        };
        Some(category)
    }

    /// Canonical manifest key.
    pub fn key(&self) -> &'static str {
        match self {
            AssetCategory::Checkpoints => "checkpoints",
            AssetCategory::Clip => "clip",
            AssetCategory::ClipVision => "clip_vision",
            AssetCategory::Configs => "configs",
            AssetCategory::ControlNet => "controlnet",
            AssetCategory::Diffusers => "diffusers",
            AssetCategory::Embeddings => "embeddings",
            AssetCategory::Gligen => "gligen",
            AssetCategory::Hypernetworks => "hypernetworks",
            AssetCategory::Loras => "loras",
            AssetCategory::StyleModels => "style_models",
            AssetCategory::Unet => "unet",
            AssetCategory::UpscaleModels => "upscale_models",
            AssetCategory::Vae => "vae",
            AssetCategory::VaeApprox => "vae_approx",
            AssetCategory::Extensions => "extensions",
        }
    }

    pub fn is_extension(&self) -> bool {
        matches!(self, AssetCategory::Extensions)
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Where each category lands inside a UI checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiLayout {
    flavor: UiFlavor,
    ui_root: PathBuf,
}

impl UiLayout {
    pub fn new(flavor: UiFlavor, ui_root: impl Into<PathBuf>) -> Self {
        Self {
            flavor,
            ui_root: ui_root.into(),
        }
    }

    pub fn flavor(&self) -> UiFlavor {
        self.flavor
    }

    pub fn ui_root(&self) -> &Path {
        &self.ui_root
    }

    /// Destination directory, or `None` when this UI has no place for the category.
    pub fn destination(&self, category: AssetCategory) -> Option<PathBuf> {
        self.relative_destination(category)
            .map(|rel| self.ui_root.join(rel))
    }

    fn relative_destination(&self, category: AssetCategory) -> Option<&'static str> {
        use AssetCategory::*;
        match self.flavor {
            UiFlavor::ComfyUi => Some(match category {
                Checkpoints => "models/checkpoints",
                Clip => "models/clip",
                ClipVision => "models/clip_vision",
                Configs => "models/configs",
                ControlNet => "models/controlnet",
                Diffusers => "models/diffusers",
                Embeddings => "models/embeddings",
                Gligen => "models/gligen",
                Hypernetworks => "models/hypernetworks",
                Loras => "models/loras",
                StyleModels => "models/style_models",
                Unet => "models/unet",
                UpscaleModels => "models/upscale_models",
                Vae => "models/vae",
                VaeApprox => "models/vae_approx",
                Extensions => "custom_nodes",
            }),
            UiFlavor::Sdw => match category {
                Checkpoints => Some("models/Stable-diffusion"),
                Vae => Some("models/VAE"),
                Loras => Some("models/Lora"),
                Embeddings => Some("embeddings"),
                ControlNet => Some("models/ControlNet"),
                Hypernetworks => Some("models/hypernetworks"),
                UpscaleModels => Some("models/ESRGAN"),
                Extensions => Some("extensions"),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        assert_eq!(AssetCategory::from_key("model"), Some(AssetCategory::Checkpoints));
        assert_eq!(AssetCategory::from_key("lora"), Some(AssetCategory::Loras));
        assert_eq!(AssetCategory::from_key("style_model"), Some(AssetCategory::StyleModels));
        assert_eq!(AssetCategory::from_key("clip_version"), Some(AssetCategory::ClipVision));
        assert_eq!(AssetCategory::from_key("unknown_category"), None);
    }

    #[test]
    fn test_canonical_keys_round_trip() {
        for category in AssetCategory::ALL {
            assert_eq!(AssetCategory::from_key(category.key()), Some(category));
        }
    }

    #[test]
    fn test_comfyui_has_every_category() {
        let layout = UiLayout::new(UiFlavor::ComfyUi, "/content/ComfyUI");
        for category in AssetCategory::ALL {
            assert!(layout.destination(category).is_some(), "{category}");
        }
        assert_eq!(
            layout.destination(AssetCategory::Extensions),
            Some(PathBuf::from("/content/ComfyUI/custom_nodes"))
        );
        assert_eq!(
            layout.destination(AssetCategory::StyleModels),
            Some(PathBuf::from("/content/ComfyUI/models/style_models"))
        );
    }

    #[test]
    fn test_sdw_layout() {
        let layout = UiLayout::new(UiFlavor::Sdw, "/home/sdw");
        assert_eq!(
            layout.destination(AssetCategory::Checkpoints),
            Some(PathBuf::from("/home/sdw/models/Stable-diffusion"))
        );
        assert_eq!(
            layout.destination(AssetCategory::Loras),
            Some(PathBuf::from("/home/sdw/models/Lora"))
        );
        assert_eq!(layout.destination(AssetCategory::Gligen), None);
    }
}
