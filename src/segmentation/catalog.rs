//! Known segmentation models and how to feed them.
//!
//! Every entry describes an ONNX export that lives in the models directory
//! under `file_name`. The tensor conventions follow the upstream training
//! recipes of each network.

use serde::Serialize;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How raw 8-bit pixel values are brought into `[0, 1]` before mean/std
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputScale {
    /// Divide by 255
    Unit,
    /// Divide by the largest channel value in the resized image
    MaxValue,
}

/// Which session output carries the mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSelect {
    First,
    Last,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub file_name: &'static str,
    pub input_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub scale: InputScale,
    pub output: OutputSelect,
    /// Apply a logistic sigmoid to the raw prediction
    pub sigmoid: bool,
    /// Stretch the prediction to the full `[0, 1]` range
    pub min_max_normalize: bool,
}

pub static CATALOG: &[ModelSpec] = &[
    ModelSpec {
        name: "u2net",
        description: "U2-Net general purpose salient object segmentation",
        file_name: "u2net.onnx",
        input_size: 320,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        scale: InputScale::MaxValue,
        output: OutputSelect::First,
        sigmoid: false,
        min_max_normalize: true,
    },
    ModelSpec {
        name: "u2net_human_seg",
        description: "U2-Net trained for human segmentation",
        file_name: "u2net_human_seg.onnx",
        input_size: 320,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        scale: InputScale::MaxValue,
        output: OutputSelect::First,
        sigmoid: false,
        min_max_normalize: true,
    },
    ModelSpec {
        name: "silueta",
        description: "Reduced-size U2-Net, fast general purpose",
        file_name: "silueta.onnx",
        input_size: 320,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        scale: InputScale::MaxValue,
        output: OutputSelect::First,
        sigmoid: false,
        min_max_normalize: true,
    },
    ModelSpec {
        name: "isnet-general-use",
        description: "ISNet dichotomous image segmentation, general use",
        file_name: "isnet-general-use.onnx",
        input_size: 1024,
        mean: [0.5, 0.5, 0.5],
        std: [1.0, 1.0, 1.0],
        scale: InputScale::MaxValue,
        output: OutputSelect::First,
        sigmoid: false,
        min_max_normalize: true,
    },
    ModelSpec {
        name: "rmbg-1.4",
        description: "BRIA RMBG 1.4 background removal",
        file_name: "rmbg-1.4.onnx",
        input_size: 1024,
        mean: [0.5, 0.5, 0.5],
        std: [1.0, 1.0, 1.0],
        scale: InputScale::Unit,
        output: OutputSelect::First,
        sigmoid: false,
        min_max_normalize: true,
    },
    ModelSpec {
        name: "rmbg-2.0",
        description: "BRIA RMBG 2.0 (BiRefNet architecture) background removal",
        file_name: "rmbg-2.0.onnx",
        input_size: 1024,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        scale: InputScale::Unit,
        output: OutputSelect::Last,
        sigmoid: true,
        min_max_normalize: false,
    },
    ModelSpec {
        name: "birefnet-general",
        description: "BiRefNet bilateral reference segmentation, general use",
        file_name: "birefnet-general.onnx",
        input_size: 1024,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        scale: InputScale::Unit,
        output: OutputSelect::Last,
        sigmoid: true,
        min_max_normalize: false,
    },
];

/// Short names accepted by the API in place of catalog names
pub static ALIASES: &[(&str, &str)] = &[
    ("general", "u2net"),
    ("human", "u2net_human_seg"),
    ("object", "silueta"),
    ("advanced", "isnet-general-use"),
    ("rmbg", "rmbg-1.4"),
    ("rmbg2", "rmbg-2.0"),
    ("birefnet", "birefnet-general"),
];

/// Resolve a catalog name or alias to its catalog name.
pub fn canonical_name(name: &str) -> Option<&'static str> {
    let name = name.trim();
    if let Some(spec) = CATALOG.iter().find(|s| s.name.eq_ignore_ascii_case(name)) {
        return Some(spec.name);
    }
    ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(_, target)| *target)
}

pub fn find(name: &str) -> Option<&'static ModelSpec> {
    let canonical = canonical_name(name)?;
    CATALOG.iter().find(|s| s.name == canonical)
}
