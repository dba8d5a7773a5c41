//! 描いた文字の判定
//!
//! 推論結果の上位2件と目標の文字を比べて、練習用のフィードバックを決めます。

use serde::Serialize;

use crate::ml::Prediction;

/// 上位1件がこの確信度以上なら正解とみなす
pub const HIGH_CONFIDENCE: f32 = 0.6;

/// 確信度が低くても、2位との差がこれ以上あれば正解とみなす
pub const MIN_MARGIN: f32 = 0.08;

/// 別の文字として読めたと判断する確信度
pub const OTHER_LETTER_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Correct,
    /// 2位が目標の文字
    Close,
    /// 別の文字としてはっきり読めた
    OtherLetter(String),
    Unclear,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Correct => write!(f, "correct"),
            Verdict::Close => write!(f, "close"),
            Verdict::OtherLetter(letter) => write!(f, "looks like {}", letter),
            Verdict::Unclear => write!(f, "unclear"),
        }
    }
}

/// 確信度の降順に並んだ推論結果を目標の文字と比べる
///
/// 大文字小文字は区別しません（`'a'` を目標にしても `"A"` と一致します）。
pub fn grade(ranking: &[Prediction], target: &str) -> Verdict {
    let Some(top1) = ranking.first() else {
        return Verdict::Unclear;
    };
    let top2 = ranking.get(1);
    let is_target = |p: &Prediction| p.label.eq_ignore_ascii_case(target);

    let margin = top1.confidence - top2.map_or(0.0, |p| p.confidence);
    if is_target(top1) && (top1.confidence >= HIGH_CONFIDENCE || margin >= MIN_MARGIN) {
        return Verdict::Correct;
    }

    if top2.is_some_and(is_target) {
        return Verdict::Close;
    }

    if top1.confidence > OTHER_LETTER_CONFIDENCE {
        return Verdict::OtherLetter(top1.label.clone());
    }

    Verdict::Unclear
}
