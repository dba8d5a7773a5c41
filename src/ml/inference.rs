//! モデル推論機能

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::ml::LetterClassifier;
use crate::model::{load_model_with_metadata, ModelMetadata};

/// 1クラス分の推論結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: LetterClassifier<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;

        // 保存時の層構成でモデルを組み直してから重みを流し込む
        let model = metadata
            .model_config()
            .init::<B>(&device)
            .context("保存されたモデル構成が不正です")?;

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

        Ok(Self::new(model.load_record(record), metadata, device))
    }

    /// 構築済みのモデルから推論エンジンを作る
    pub fn new(model: LetterClassifier<B>, metadata: ModelMetadata, device: B::Device) -> Self {
        Self {
            model,
            metadata,
            device,
        }
    }

    /// 1枚の画像を分類し、全クラスを確信度の降順で返す
    ///
    /// `glyph` は `[size, size, channels]` を行優先で平坦化した 0.0..=1.0 の値。
    pub fn rank(&self, glyph: &[f32]) -> Result<Vec<Prediction>> {
        let size = self.metadata.image_size;
        let channels = self.metadata.channels;
        let expected = size * size * channels;
        if glyph.len() != expected {
            anyhow::bail!(
                "入力画像のサイズが不正です: {} 要素 (期待値 {})",
                glyph.len(),
                expected
            );
        }

        let tensor = Tensor::<B, 1>::from_floats(glyph, &self.device)
            .reshape([1, size, size, channels])
            .permute([0, 3, 1, 2]);

        let probabilities = self
            .model
            .predict(tensor)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;

        let mut ranking = probabilities
            .into_iter()
            .enumerate()
            .map(|(index, confidence)| {
                let label = self
                    .metadata
                    .class_index_to_label(index)
                    .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", index))?;
                Ok(Prediction {
                    label: label.to_string(),
                    confidence,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        ranking.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        if let Some(top) = ranking.first() {
            debug!("推論結果: {} ({:.3})", top.label, top.confidence);
        }
        Ok(ranking)
    }

    /// メタデータへの参照を取得
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}
