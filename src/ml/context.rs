//! 学習コンテキスト
//!
//! デバイスとシードを明示的に保持し、モデル構築と学習に渡します。

use burn::tensor::backend::Backend;

use crate::ml::layers::TopologyError;
use crate::ml::{LetterClassifier, ModelConfig};

#[derive(Debug, Clone)]
pub struct TrainingContext<B: Backend> {
    device: B::Device,
    seed: u64,
}

impl<B: Backend> TrainingContext<B> {
    pub fn new(device: B::Device, seed: u64) -> Self {
        Self { device, seed }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// このコンテキストのデバイス上にモデルを構築する
    ///
    /// 構築前にバックエンドの乱数をコンテキストのシードで初期化します。
    pub fn build_model(&self, config: &ModelConfig) -> Result<LetterClassifier<B>, TopologyError> {
        B::seed(&self.device, self.seed);
        config.init::<B>(&self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::module::Module;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_build_model_uses_context() {
        let ctx = TrainingContext::<TestBackend>::new(NdArrayDevice::default(), 42);
        assert_eq!(ctx.seed(), 42);

        let model = ctx.build_model(&ModelConfig::letters()).unwrap();
        assert_eq!(model.num_params(), 227_098);
    }
}
