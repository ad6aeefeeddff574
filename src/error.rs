//! NMS の入力検証で発生するエラー

use crate::bbox::BBox;

/// NMS の呼び出し側の入力誤りを表すエラー
///
/// どちらも抑制処理を始める前の検証で検出されます。
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum NmsError {
    /// right < left または bottom < top となっているバウンディングボックス
    #[error("invalid box geometry at index {index}: {bbox:?}")]
    InvalidGeometry { index: usize, bbox: BBox },

    /// [0, 1] の範囲外の IoU 閾値
    #[error("IoU threshold must be in [0, 1], got {0}")]
    InvalidThreshold(f32),
}
