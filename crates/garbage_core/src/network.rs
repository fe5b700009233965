//! Frozen VGG-style feature extractor plus the trainable classification head.
//!
//! Architecture:
//! - backbone: blocks of 3x3 same-padded convolutions, each followed by ReLU,
//!   with a 2x2 max-pool closing every block
//! - head: flatten, `Linear(features, hidden)`, ReLU, `Linear(hidden, classes)`
//!
//! Inputs are NHWC `(batch, size, size, 3)` tensors in `[0, 1]`; the backbone
//! permutes to NCHW before the first convolution.

use std::collections::HashMap;

use candle_core::{D, Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Linear, VarBuilder, conv2d, linear};
use serde::{Deserialize, Serialize};

/// Layout of the convolutional backbone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackboneSpec {
    /// Output channels of each convolution, grouped by pooling block.
    pub blocks: Vec<Vec<usize>>,
}

impl Default for BackboneSpec {
    fn default() -> Self {
        Self::vgg16()
    }
}

/// One convolution of the backbone with its weight-file prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvLayer {
    /// Position in the torchvision `features` sequence.
    pub index: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    /// Index of the pooling block this convolution belongs to.
    pub block: usize,
}

impl ConvLayer {
    pub fn prefix(&self) -> String {
        format!("features.{}", self.index)
    }
}

impl BackboneSpec {
    /// The 13-convolution VGG16 feature extractor.
    pub fn vgg16() -> Self {
        Self {
            blocks: vec![
                vec![64, 64],
                vec![128, 128],
                vec![256, 256, 256],
                vec![512, 512, 512],
                vec![512, 512, 512],
            ],
        }
    }

    /// Convolutions in forward order.
    ///
    /// Indices follow the torchvision numbering, where each convolution is
    /// followed by a ReLU slot and each block by a pooling slot.
    pub fn conv_layers(&self) -> Vec<ConvLayer> {
        let mut layers = Vec::new();
        let mut index = 0;
        let mut in_channels = 3;
        for (block, widths) in self.blocks.iter().enumerate() {
            for &out_channels in widths {
                layers.push(ConvLayer {
                    index,
                    in_channels,
                    out_channels,
                    block,
                });
                in_channels = out_channels;
                index += 2;
            }
            index += 1;
        }
        layers
    }

    /// Channels leaving the backbone.
    pub fn out_channels(&self) -> usize {
        self.blocks
            .iter()
            .rev()
            .find_map(|b| b.last().copied())
            .unwrap_or(3)
    }

    /// Length of the flattened feature vector for a square input.
    pub fn feature_len(&self, input_size: u32) -> usize {
        let side = (0..self.blocks.len()).fold(input_size as usize, |s, _| s / 2);
        self.out_channels() * side * side
    }
}

/// Frozen convolutional feature extractor.
pub struct Backbone {
    blocks: Vec<Vec<(String, Conv2d)>>,
}

impl Backbone {
    /// Build from a builder rooted at the weight file (keys `features.<n>.*`).
    pub fn new(vb: VarBuilder, spec: &BackboneSpec) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Conv2dConfig::default()
        };
        let mut blocks: Vec<Vec<(String, Conv2d)>> = vec![Vec::new(); spec.blocks.len()];
        for layer in spec.conv_layers() {
            let prefix = layer.prefix();
            let conv = conv2d(
                layer.in_channels,
                layer.out_channels,
                3,
                cfg,
                vb.pp(&prefix),
            )?;
            blocks[layer.block].push((prefix, conv));
        }
        Ok(Self { blocks })
    }

    /// All backbone weights keyed as in the weight file.
    pub fn named_tensors(&self) -> HashMap<String, Tensor> {
        let mut out = HashMap::new();
        for (prefix, conv) in self.blocks.iter().flatten() {
            out.insert(format!("{prefix}.weight"), conv.weight().clone());
            if let Some(bias) = conv.bias() {
                out.insert(format!("{prefix}.bias"), bias.clone());
            }
        }
        out
    }
}

impl Module for Backbone {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut x = xs.permute((0, 3, 1, 2))?.contiguous()?;
        for block in &self.blocks {
            for (_, conv) in block {
                x = conv.forward(&x)?.relu()?;
            }
            x = x.max_pool2d(2)?;
        }
        x.flatten_from(1)
    }
}

/// Trainable dense layers on top of the flattened features.
pub struct ClassifierHead {
    hidden: Linear,
    output: Linear,
}

impl ClassifierHead {
    pub fn new(vb: VarBuilder, features: usize, hidden: usize, classes: usize) -> Result<Self> {
        Ok(Self {
            hidden: linear(features, hidden, vb.pp("hidden"))?,
            output: linear(hidden, classes, vb.pp("output"))?,
        })
    }

    pub fn classes(&self) -> usize {
        self.output.weight().dim(0).unwrap_or(0)
    }
}

impl Module for ClassifierHead {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let x = self.hidden.forward(xs)?.relu()?;
        self.output.forward(&x)
    }
}

/// Complete network: backbone followed by head. `forward` yields logits.
pub struct GarbageNet {
    backbone: Backbone,
    head: ClassifierHead,
}

impl GarbageNet {
    pub fn new(backbone: Backbone, head: ClassifierHead) -> Self {
        Self { backbone, head }
    }

    /// Build from a single weight file holding `features.*` and `head.*`.
    pub fn load(
        vb: VarBuilder,
        spec: &BackboneSpec,
        input_size: u32,
        hidden: usize,
        classes: usize,
    ) -> Result<Self> {
        let backbone = Backbone::new(vb.clone(), spec)?;
        let head = ClassifierHead::new(vb.pp("head"), spec.feature_len(input_size), hidden, classes)?;
        Ok(Self::new(backbone, head))
    }

    pub fn classes(&self) -> usize {
        self.head.classes()
    }

    /// Softmax over the class axis.
    pub fn probabilities(&self, xs: &Tensor) -> Result<Tensor> {
        let logits = self.forward(xs)?;
        candle_nn::ops::softmax(&logits, D::Minus1)
    }
}

impl Module for GarbageNet {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let features = self.backbone.forward(xs)?;
        self.head.forward(&features)
    }
}
