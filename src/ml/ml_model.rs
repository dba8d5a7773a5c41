//! 機械学習モデルの共通定義
//!
//! 手書き英字分類用のCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use tracing::debug;

use crate::dataset::GLYPH_SIZE;
use crate::ml::layers::{plan_stack, LayerSpec, StackPlan, TopologyError};
use crate::preprocess::CHANNELS;

/// クラス数
pub const NUM_CLASSES: usize = 26;

/// 画像サイズ
pub const IMAGE_SIZE: usize = GLYPH_SIZE;

/// クラス名の定義（ラベル 0 = 'A'）
pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R",
    "S", "T", "U", "V", "W", "X", "Y", "Z",
];

/// クラスインデックスから文字を取得
pub fn class_label(index: usize) -> Option<&'static str> {
    CLASS_NAMES.get(index).copied()
}

/// 文字（大文字・小文字どちらでも）からクラスインデックスを取得
pub fn class_index(letter: char) -> Option<usize> {
    letter
        .is_ascii_alphabetic()
        .then(|| (letter.to_ascii_uppercase() as u8 - b'A') as usize)
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 層構成（入力側から順に）
    pub layers: Vec<LayerSpec>,
    /// 入力画像サイズ（正方形）
    #[config(default = 28)]
    pub image_size: usize,
    /// 入力チャンネル数
    #[config(default = 1)]
    pub channels: usize,
}

impl ModelConfig {
    /// 文字分類用の既定構成
    pub fn letters() -> Self {
        Self::new(NUM_CLASSES, crate::ml::layers::letter_stack(NUM_CLASSES))
            .with_image_size(IMAGE_SIZE)
            .with_channels(CHANNELS)
    }

    /// 層構成を検証して形状を決める
    pub fn plan(&self) -> Result<StackPlan, TopologyError> {
        plan_stack(&self.layers, self.image_size, self.channels, self.num_classes)
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<LetterClassifier<B>, TopologyError> {
        let plan = self.plan()?;

        debug!("[Model] 入力サイズ: {0}x{0}x{1}", self.image_size, self.channels);
        let blocks = plan
            .blocks
            .iter()
            .map(|block| {
                debug!(
                    "[Model] Conv {}x{}: {} -> {} ch, 出力 {}x{}",
                    block.kernel[0],
                    block.kernel[1],
                    block.channels[0],
                    block.channels[1],
                    block.output[0],
                    block.output[1]
                );
                ConvBlock {
                    conv: Conv2dConfig::new(block.channels, block.kernel).init(device),
                    pool: block
                        .pool
                        .map(|pool| MaxPool2dConfig::new(pool).with_strides(pool).init()),
                    activation: Relu::new(),
                }
            })
            .collect();

        debug!("[Model] Flatten後の特徴次元: {}", plan.flat_features);
        let hidden = plan
            .hidden
            .iter()
            .map(|[d_input, d_output]| {
                debug!("[Model] FC: {} -> {}", d_input, d_output);
                LinearConfig::new(*d_input, *d_output).init(device)
            })
            .collect();

        let [d_input, d_output] = plan.output;
        debug!("[Model] 出力層: {} -> {} (softmax)", d_input, d_output);

        Ok(LetterClassifier {
            blocks,
            hidden,
            output: LinearConfig::new(d_input, d_output).init(device),
            activation: Relu::new(),
        })
    }
}

/// 畳み込み + ReLU + (任意の) 最大プーリング
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: Option<MaxPool2d>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.activation.forward(x);
        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// 手書き英字分類用CNNモデル
///
/// # アーキテクチャ（既定構成）
/// - Conv 3x3 (32) + ReLU + MaxPool 2x2
/// - Conv 3x3 (64) + ReLU + MaxPool 2x2
/// - Flatten
/// - FC: 1600 -> 128 + ReLU
/// - FC: 128 -> 26
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct LetterClassifier<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> LetterClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, channels, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }

        // Flatten
        let [_, c, h, w] = x.dims();
        let mut x = x.reshape([batch_size, c * h * w]);

        for linear in &self.hidden {
            x = self.activation.forward(linear.forward(x));
        }

        self.output.forward(x)
    }

    /// クラス確率（softmax）を返す
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// 損失はロジットに対するクロスエントロピーで、
    /// softmax 出力 + 整数ラベルの sparse categorical cross-entropy と同じ値になります。
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// 各パラメータテンソルの形状（入力側から順に）
    pub fn parameter_shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes = Vec::new();
        for block in &self.blocks {
            shapes.push(block.conv.weight.val().dims().to_vec());
            if let Some(bias) = &block.conv.bias {
                shapes.push(bias.val().dims().to_vec());
            }
        }
        for linear in self.hidden.iter().chain(std::iter::once(&self.output)) {
            shapes.push(linear.weight.val().dims().to_vec());
            if let Some(bias) = &linear.bias {
                shapes.push(bias.val().dims().to_vec());
            }
        }
        shapes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::layers::{Activation, LayerSpec};
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_class_names() {
        assert_eq!(class_label(0), Some("A"));
        assert_eq!(class_label(25), Some("Z"));
        assert_eq!(class_label(26), None);
        assert_eq!(class_index('a'), Some(0));
        assert_eq!(class_index('Q'), Some(16));
        assert_eq!(class_index('3'), None);
    }

    #[test]
    fn test_forward_shapes() {
        let device = NdArrayDevice::default();
        let model = ModelConfig::letters().init::<TestBackend>(&device).unwrap();

        let images = Tensor::<TestBackend, 4>::zeros([3, 1, 28, 28], &device);
        let logits = model.forward(images.clone());
        assert_eq!(logits.dims(), [3, 26]);

        let probs = model.predict(images);
        let sums = probs.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_architecture_is_deterministic() {
        let device = NdArrayDevice::default();
        let first = ModelConfig::letters().init::<TestBackend>(&device).unwrap();
        let second = ModelConfig::letters().init::<TestBackend>(&device).unwrap();

        assert_eq!(first.parameter_shapes(), second.parameter_shapes());
        assert_eq!(first.num_params(), second.num_params());
        assert_eq!(
            first.parameter_shapes(),
            vec![
                vec![32, 1, 3, 3],
                vec![32],
                vec![64, 32, 3, 3],
                vec![64],
                vec![1600, 128],
                vec![128],
                vec![128, 26],
                vec![26],
            ]
        );
        // 320 + 18496 + 204928 + 3354
        assert_eq!(first.num_params(), 227_098);
    }

    #[test]
    fn test_invalid_stack_is_rejected() {
        let device = NdArrayDevice::default();
        let config = ModelConfig::new(
            26,
            vec![LayerSpec::Dense {
                units: 26,
                activation: Activation::Softmax,
            }],
        );
        assert!(matches!(
            config.init::<TestBackend>(&device),
            Err(TopologyError::DenseBeforeFlatten { index: 0 })
        ));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = ModelConfig::letters();
        let json = serde_json::to_string(&config).unwrap();
        let restored: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.layers, config.layers);
        assert_eq!(restored.image_size, 28);
        assert_eq!(restored.channels, 1);
    }
}
