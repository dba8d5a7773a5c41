//! 層構成の宣言
//!
//! モデルは `LayerSpec` の順序付きリストとして記述し、`plan_stack` で検証と
//! 形状推論を行ってから `ModelConfig::init` で組み立てます。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 活性化関数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Softmax,
}

/// 1層分の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSpec {
    /// 3x3 などの畳み込み（padding無し, stride 1）
    Conv2d {
        filters: usize,
        kernel: [usize; 2],
        activation: Activation,
    },
    /// 最大プーリング（stride = pool）
    MaxPool2d { pool: [usize; 2] },
    Flatten,
    /// 全結合層
    Dense { units: usize, activation: Activation },
}

/// 文字分類用の固定構成
///
/// Conv(32, 3x3) + Pool(2x2) → Conv(64, 3x3) + Pool(2x2) → Flatten → Dense(128) → Dense(num_classes, softmax)
pub fn letter_stack(num_classes: usize) -> Vec<LayerSpec> {
    vec![
        LayerSpec::Conv2d {
            filters: 32,
            kernel: [3, 3],
            activation: Activation::Relu,
        },
        LayerSpec::MaxPool2d { pool: [2, 2] },
        LayerSpec::Conv2d {
            filters: 64,
            kernel: [3, 3],
            activation: Activation::Relu,
        },
        LayerSpec::MaxPool2d { pool: [2, 2] },
        LayerSpec::Flatten,
        LayerSpec::Dense {
            units: 128,
            activation: Activation::Relu,
        },
        LayerSpec::Dense {
            units: num_classes,
            activation: Activation::Softmax,
        },
    ]
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("layer {index}: {layer} is not allowed after flatten")]
    SpatialAfterFlatten { index: usize, layer: &'static str },
    #[error("layer {index}: dense layer needs a flatten before it")]
    DenseBeforeFlatten { index: usize },
    #[error("layer {index}: max pooling must directly follow a convolution")]
    DanglingPool { index: usize },
    #[error("layer {index}: kernel {kernel:?} does not fit a {height}x{width} feature map")]
    KernelTooLarge {
        index: usize,
        kernel: [usize; 2],
        height: usize,
        width: usize,
    },
    #[error("layer {index}: {what} must be non-zero")]
    ZeroSized { index: usize, what: &'static str },
    #[error("{what} must be non-zero")]
    ZeroSizedInput { what: &'static str },
    #[error("layer {index}: softmax is only supported on the final dense layer")]
    MisplacedSoftmax { index: usize },
    #[error("the stack must end with a softmax dense layer")]
    MissingOutput,
    #[error("output layer has {units} units but the dataset has {num_classes} classes")]
    OutputWidth { units: usize, num_classes: usize },
}

/// 畳み込みブロック1つ分の計画
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvPlan {
    pub channels: [usize; 2],
    pub kernel: [usize; 2],
    pub pool: Option<[usize; 2]>,
    /// ブロック出力の (高さ, 幅)
    pub output: [usize; 2],
}

/// 検証済みの構成
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackPlan {
    pub blocks: Vec<ConvPlan>,
    /// Flatten 直後の特徴次元
    pub flat_features: usize,
    /// 隠れ全結合層の (入力, 出力)
    pub hidden: Vec<[usize; 2]>,
    /// 出力層の (入力, 出力)
    pub output: [usize; 2],
}

enum Stage {
    Spatial {
        channels: usize,
        height: usize,
        width: usize,
    },
    Flat(usize),
}

/// 層リストを検証し、各層の形状を決める
pub fn plan_stack(
    layers: &[LayerSpec],
    image_size: usize,
    channels: usize,
    num_classes: usize,
) -> Result<StackPlan, TopologyError> {
    for (value, what) in [
        (image_size, "image size"),
        (channels, "channel count"),
        (num_classes, "class count"),
    ] {
        if value == 0 {
            return Err(TopologyError::ZeroSizedInput { what });
        }
    }

    let mut stage = Stage::Spatial {
        channels,
        height: image_size,
        width: image_size,
    };
    let mut blocks: Vec<ConvPlan> = Vec::new();
    let mut dense: Vec<([usize; 2], Activation, usize)> = Vec::new();
    let mut flat_features = 0;
    let mut previous_was_conv = false;

    for (index, layer) in layers.iter().enumerate() {
        match (layer, &stage) {
            (
                LayerSpec::Conv2d {
                    filters,
                    kernel,
                    activation,
                },
                Stage::Spatial {
                    channels,
                    height,
                    width,
                },
            ) => {
                if *activation != Activation::Relu {
                    return Err(TopologyError::MisplacedSoftmax { index });
                }
                if *filters == 0 || kernel.contains(&0) {
                    return Err(TopologyError::ZeroSized {
                        index,
                        what: "convolution",
                    });
                }
                if kernel[0] > *height || kernel[1] > *width {
                    return Err(TopologyError::KernelTooLarge {
                        index,
                        kernel: *kernel,
                        height: *height,
                        width: *width,
                    });
                }
                let output = [height - kernel[0] + 1, width - kernel[1] + 1];
                blocks.push(ConvPlan {
                    channels: [*channels, *filters],
                    kernel: *kernel,
                    pool: None,
                    output,
                });
                stage = Stage::Spatial {
                    channels: *filters,
                    height: output[0],
                    width: output[1],
                };
                previous_was_conv = true;
                continue;
            }
            (LayerSpec::MaxPool2d { pool }, Stage::Spatial { channels, .. }) => {
                let block = match blocks.last_mut() {
                    Some(block) if previous_was_conv => block,
                    _ => return Err(TopologyError::DanglingPool { index }),
                };
                if pool.contains(&0) {
                    return Err(TopologyError::ZeroSized {
                        index,
                        what: "pool",
                    });
                }
                let [height, width] = block.output;
                if pool[0] > height || pool[1] > width {
                    return Err(TopologyError::KernelTooLarge {
                        index,
                        kernel: *pool,
                        height,
                        width,
                    });
                }
                block.pool = Some(*pool);
                block.output = [height / pool[0], width / pool[1]];
                stage = Stage::Spatial {
                    channels: *channels,
                    height: block.output[0],
                    width: block.output[1],
                };
            }
            (
                LayerSpec::Flatten,
                Stage::Spatial {
                    channels,
                    height,
                    width,
                },
            ) => {
                flat_features = channels * height * width;
                stage = Stage::Flat(flat_features);
            }
            (LayerSpec::Dense { units, activation }, Stage::Flat(features)) => {
                if *units == 0 {
                    return Err(TopologyError::ZeroSized {
                        index,
                        what: "dense layer",
                    });
                }
                dense.push(([*features, *units], *activation, index));
                stage = Stage::Flat(*units);
            }
            (LayerSpec::Dense { .. }, Stage::Spatial { .. }) => {
                return Err(TopologyError::DenseBeforeFlatten { index });
            }
            (LayerSpec::Conv2d { .. }, Stage::Flat(_)) => {
                return Err(TopologyError::SpatialAfterFlatten {
                    index,
                    layer: "convolution",
                });
            }
            (LayerSpec::MaxPool2d { .. }, Stage::Flat(_)) => {
                return Err(TopologyError::SpatialAfterFlatten {
                    index,
                    layer: "max pooling",
                });
            }
            (LayerSpec::Flatten, Stage::Flat(_)) => {
                return Err(TopologyError::SpatialAfterFlatten {
                    index,
                    layer: "flatten",
                });
            }
        }
        previous_was_conv = false;
    }

    let (output, activation, _) = dense.pop().ok_or(TopologyError::MissingOutput)?;
    if activation != Activation::Softmax {
        return Err(TopologyError::MissingOutput);
    }
    if let Some((_, _, index)) = dense.iter().find(|(_, a, _)| *a == Activation::Softmax) {
        return Err(TopologyError::MisplacedSoftmax { index: *index });
    }
    if output[1] != num_classes {
        return Err(TopologyError::OutputWidth {
            units: output[1],
            num_classes,
        });
    }

    Ok(StackPlan {
        blocks,
        flat_features,
        hidden: dense.into_iter().map(|(shape, _, _)| shape).collect(),
        output,
    })
}
