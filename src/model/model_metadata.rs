//! モデルメタデータの定義
//!
//! tar.gz内の `metadata.json` として保存され、推論時にモデル構成を復元するのに使います。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::{EpochMetrics, LayerSpec, ModelConfig};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスラベル（インデックス順）
    /// 例: ["A", "B", ..., "Z"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形）
    pub image_size: usize,

    /// 入力チャンネル数
    pub channels: usize,

    /// 層構成
    pub layers: Vec<LayerSpec>,

    /// 学習エポック数
    pub num_epochs: usize,

    /// 最終エポックの指標
    #[serde(default)]
    pub final_metrics: Option<EpochMetrics>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        config: &ModelConfig,
        class_labels: Vec<String>,
        num_epochs: usize,
        final_metrics: Option<EpochMetrics>,
    ) -> Self {
        Self {
            class_labels,
            image_size: config.image_size,
            channels: config.channels,
            layers: config.layers.clone(),
            num_epochs,
            final_metrics,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// 保存時のモデル設定を復元
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.class_labels.len(), self.layers.clone())
            .with_image_size(self.image_size)
            .with_channels(self.channels)
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
