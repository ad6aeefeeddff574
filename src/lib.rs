//! # R-CNN 系パイプライン向け Non-Maximum Suppression ライブラリ
//!
//! このクレートは、組み込みアクセラレータ上の2段階物体検出パイプラインで使う後処理を提供します。
//!
//! ## 主な機能
//!
//! 1. **NMS**: スコア付きのバウンディングボックスから、互いに大きく重なる候補を取り除きます。
//! 2. **クラス別 NMS**: クラスラベルごとに独立して NMS を適用します。
//! 3. **スコアの対応付け**: NMS で残った候補に元のスコアを対応付け直します。
//! 4. **特徴マップの切り出し**: 残った ROI で特徴マップを切り出します。
//! 5. **2段階パイプライン**: 提案 NMS → 切り出し → 分類器 → 検出 NMS をまとめて実行します。
//!
//! ## Example
//! ```
//! use rcnn_nms::bbox::ScoredBox;
//! use rcnn_nms::nms::suppress;
//!
//! let raw: [(f32, f32, f32, f32, f32); 4] = [
//!     (12., 30., 76., 94., 0.5),
//!     (12., 36., 76., 100., 0.7),
//!     (72., 36., 200., 164., 0.7),
//!     (84., 48., 212., 176., 0.65),
//! ];
//! let candidates: Vec<ScoredBox> = raw.into_iter().map(ScoredBox::from).collect();
//!
//! let keep = suppress(&candidates, 0.3)?;
//! assert_eq!(keep, vec![1, 2]);
//! # Ok::<(), rcnn_nms::error::NmsError>(())
//! ```

pub mod bbox;
pub mod crop;
pub mod error;
pub mod img_proc;
pub mod nms;
pub mod pipeline;
