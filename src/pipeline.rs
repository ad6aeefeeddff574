//! 2段階の検出パイプラインの後処理をコントロールするモジュール
//!
//! 1. 領域提案に NMS を適用して ROI を選ぶ
//! 2. ROI に元のスコアを対応付ける
//! 3. ROI で特徴マップを切り出す
//! 4. 分類器で BBox を補正する
//! 5. 補正済みの BBox に再び NMS を適用する

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::bbox::{BBox, CoordConvention, ScoredBox};
use crate::crop::{crop, Crops, FeatureMap};
use crate::error::NmsError;
use crate::nms::{self, map_scores, materialize};

/// 1回の NMS の設定
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NmsConfig {
    /// IoU の閾値
    pub iou_threshold: f32,
    #[serde(default)]
    pub convention: CoordConvention,
}

impl NmsConfig {
    pub fn new(iou_threshold: f32) -> Self {
        Self {
            iou_threshold,
            convention: CoordConvention::Discrete,
        }
    }

    /// この設定で NMS を行います。
    pub fn apply(&self, candidates: &[ScoredBox]) -> Result<Vec<usize>, NmsError> {
        nms::suppress_with(candidates, self.iou_threshold, self.convention)
    }

    fn validate(&self) -> Result<(), NmsError> {
        nms::validate(&[], self.iou_threshold)
    }
}

/// パイプライン全体の設定
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 領域提案に対する NMS
    pub proposal: NmsConfig,
    /// 補正済みの検出に対する NMS
    pub detection: NmsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            proposal: NmsConfig::new(0.7),
            detection: NmsConfig::new(0.3),
        }
    }
}

impl PipelineConfig {
    /// JSONファイルから設定を読み込みます。
    ///
    /// # Args
    /// * `path` - 設定ファイルのパス
    ///
    /// # Return
    /// * 検証済みの設定
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        info!("pipeline config loaded from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// 両方の閾値が [0, 1] に収まっているか検証します。
    pub fn validate(&self) -> Result<()> {
        self.proposal.validate().context("proposal nms")?;
        self.detection.validate().context("detection nms")?;
        Ok(())
    }
}

/// ROI の分類とBBoxの補正を行うステージ
///
/// ニューラルネットワーク側の処理で、中身はこのクレートの外にあります。
pub trait BoxClassifier {
    /// 切り出した特徴から、ROI ごとに1つの補正済みBBoxを返します。
    ///
    /// # Args
    /// * `crops` - ROI ごとに切り出した特徴
    /// * `rois` - NMS で残った ROI と対応するスコア
    fn classify(&mut self, crops: &Crops, rois: &[ScoredBox]) -> Result<Vec<BBox>>;
}

impl<F> BoxClassifier for F
where
    F: FnMut(&Crops, &[ScoredBox]) -> Result<Vec<BBox>>,
{
    fn classify(&mut self, crops: &Crops, rois: &[ScoredBox]) -> Result<Vec<BBox>> {
        self(crops, rois)
    }
}

/// 2段階の検出パイプラインの後処理
///
/// 状態を持たないので、フレームごとに `run` を呼び出せます。
pub struct TwoStagePipeline {
    config: PipelineConfig,
}

impl TwoStagePipeline {
    /// 新しい `TwoStagePipeline` インスタンスを作成します。
    ///
    /// # Args
    /// * `config` - パイプラインの設定
    ///
    /// # Return
    /// * 新たな `TwoStagePipeline` インスタンス。閾値が不正な場合はエラー
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 1フレーム分の後処理を行います。
    ///
    /// # Args
    /// * `proposals` - 領域提案
    /// * `scores` - 領域提案のスコア (`proposals` と同じ長さ)
    /// * `feature_map` - 特徴マップ
    /// * `classifier` - ROI の分類器
    ///
    /// # Return
    /// * 最終的な検出結果。スコアの降順
    pub fn run<C: BoxClassifier + ?Sized>(
        &self,
        proposals: &[BBox],
        scores: &[f32],
        feature_map: &FeatureMap,
        classifier: &mut C,
    ) -> Result<Vec<ScoredBox>> {
        ensure!(
            proposals.len() == scores.len(),
            "proposals ({}) and scores ({}) must have the same length",
            proposals.len(),
            scores.len()
        );
        if proposals.is_empty() {
            debug!("no proposals");
            return Ok(vec![]);
        }

        let candidates: Vec<ScoredBox> = proposals
            .iter()
            .zip(scores)
            .map(|(&bbox, &score)| ScoredBox::new(bbox, score))
            .collect();

        // 領域提案に NMS を適用して ROI を得る
        let roi_idx = self
            .config
            .proposal
            .apply(&candidates)
            .context("proposal nms")?;
        let rois = materialize(&candidates, &roi_idx)?;
        debug!("proposal nms: {} -> {} rois", candidates.len(), rois.len());

        // 切り捨てられた提案に合わせてスコアを対応付け直す
        // rois と mapped_scores はどちらも roi_idx の順。k 番目の補正BBoxに k 番目のスコアを付けるので順序を揃えておくこと
        let mapped_scores = map_scores(scores, &roi_idx)?;

        // ROI プーリングの入力を作る
        let rois_bbox: Vec<BBox> = rois.iter().map(|r| r.bbox).collect();
        let crops = crop(&rois_bbox, feature_map)?;

        let refined = classifier.classify(&crops, &rois)?;
        ensure!(
            refined.len() == rois.len(),
            "classifier returned {} boxes for {} rois",
            refined.len(),
            rois.len()
        );

        // 補正したBBoxにもう一度 NMS を適用する
        let detections: Vec<ScoredBox> = refined
            .into_iter()
            .zip(mapped_scores)
            .map(|(bbox, score)| ScoredBox::new(bbox, score))
            .collect();
        let keep = self
            .config
            .detection
            .apply(&detections)
            .context("detection nms")?;
        let result = materialize(&detections, &keep)?;

        info!(
            "{} proposals -> {} rois -> {} detections",
            proposals.len(),
            rois.len(),
            result.len()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn proposals() -> (Vec<BBox>, Vec<f32>) {
        let boxes = vec![
            BBox::new(0., 0., 9., 9.),
            BBox::new(1., 1., 9., 9.),
            BBox::new(12., 12., 19., 19.),
            BBox::new(0., 12., 7., 19.),
        ];
        (boxes, vec![0.6, 0.9, 0.8, 0.4])
    }

    fn feature_map() -> FeatureMap {
        FeatureMap::new(1, 20, 20, (0..400).map(|v| v as f32).collect()).unwrap()
    }

    #[test]
    fn identity_classifier() {
        let (boxes, scores) = proposals();
        let pipeline = TwoStagePipeline::new(PipelineConfig::default()).unwrap();
        let mut seen = vec![];
        let mut classifier = |crops: &Crops, rois: &[ScoredBox]| -> Result<Vec<BBox>> {
            seen = crops.shapes.clone();
            Ok(rois.iter().map(|r| r.bbox).collect())
        };

        let result = pipeline
            .run(&boxes, &scores, &feature_map(), &mut classifier)
            .unwrap();
        assert_eq!(
            result,
            vec![
                ScoredBox::new(boxes[1], 0.9),
                ScoredBox::new(boxes[2], 0.8),
                ScoredBox::new(boxes[3], 0.4),
            ]
        );
        assert_eq!(seen, vec![(9, 9), (8, 8), (8, 8)]);
    }

    #[test]
    fn refined_boxes_keep_the_score_of_their_roi() {
        let (boxes, scores) = proposals();
        let pipeline = TwoStagePipeline::new(PipelineConfig::default()).unwrap();
        // k 番目の ROI を互いに重ならない位置へ移す
        let mut classifier = |_: &Crops, rois: &[ScoredBox]| -> Result<Vec<BBox>> {
            Ok((0..rois.len())
                .map(|k| {
                    let x = 100. * k as f32;
                    BBox::new(x, 0., x + 10., 10.)
                })
                .collect())
        };

        let result = pipeline
            .run(&boxes, &scores, &feature_map(), &mut classifier)
            .unwrap();
        assert_eq!(
            result,
            vec![
                ScoredBox::new(BBox::new(0., 0., 10., 10.), 0.9),
                ScoredBox::new(BBox::new(100., 0., 110., 10.), 0.8),
                ScoredBox::new(BBox::new(200., 0., 210., 10.), 0.4),
            ]
        );
    }

    #[test]
    fn second_stage_suppresses_refined_boxes() {
        let (boxes, scores) = proposals();
        let pipeline = TwoStagePipeline::new(PipelineConfig::default()).unwrap();
        // すべての ROI を同じ位置に補正する
        let mut classifier = |_: &Crops, rois: &[ScoredBox]| -> Result<Vec<BBox>> {
            Ok(vec![BBox::new(2., 2., 8., 8.); rois.len()])
        };

        let result = pipeline
            .run(&boxes, &scores, &feature_map(), &mut classifier)
            .unwrap();
        assert_eq!(result, vec![ScoredBox::new(BBox::new(2., 2., 8., 8.), 0.9)]);
    }

    #[test]
    fn empty_proposals() {
        let pipeline = TwoStagePipeline::new(PipelineConfig::default()).unwrap();
        let mut classifier =
            |_: &Crops, _: &[ScoredBox]| -> Result<Vec<BBox>> { unreachable!() };
        let result = pipeline
            .run(&[], &[], &feature_map(), &mut classifier)
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let (boxes, _) = proposals();
        let pipeline = TwoStagePipeline::new(PipelineConfig::default()).unwrap();
        let mut identity = |_: &Crops, rois: &[ScoredBox]| -> Result<Vec<BBox>> {
            Ok(rois.iter().map(|r| r.bbox).collect())
        };
        assert!(pipeline
            .run(&boxes, &[0.1], &feature_map(), &mut identity)
            .is_err());

        let (boxes, scores) = proposals();
        let mut short = |_: &Crops, _: &[ScoredBox]| -> Result<Vec<BBox>> { Ok(vec![]) };
        assert!(pipeline
            .run(&boxes, &scores, &feature_map(), &mut short)
            .is_err());
    }

    #[test]
    fn invalid_proposal_is_reported() {
        let (mut boxes, scores) = proposals();
        boxes[3] = BBox::new(7., 12., 0., 19.);
        let pipeline = TwoStagePipeline::new(PipelineConfig::default()).unwrap();
        let mut identity = |_: &Crops, rois: &[ScoredBox]| -> Result<Vec<BBox>> {
            Ok(rois.iter().map(|r| r.bbox).collect())
        };
        let err = pipeline
            .run(&boxes, &scores, &feature_map(), &mut identity)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<NmsError>(),
            Some(&NmsError::InvalidGeometry {
                index: 3,
                bbox: boxes[3]
            })
        );
    }

    #[test]
    fn invalid_threshold_is_rejected_at_construction() {
        let config = PipelineConfig {
            proposal: NmsConfig::new(1.2),
            ..Default::default()
        };
        assert!(TwoStagePipeline::new(config).is_err());
    }

    #[test]
    fn load_config_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "proposal": {{ "iou_threshold": 0.5 }},
                "detection": {{ "iou_threshold": 0.25, "convention": "continuous" }}
            }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.proposal, NmsConfig::new(0.5));
        assert_eq!(
            config.detection,
            NmsConfig {
                iou_threshold: 0.25,
                convention: CoordConvention::Continuous
            }
        );
    }

    #[test]
    fn config_with_invalid_threshold_fails_to_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"proposal": {{"iou_threshold": 0.5}}, "detection": {{"iou_threshold": -1}}}}"#
        )
        .unwrap();
        assert!(PipelineConfig::from_json_file(file.path()).is_err());
    }
}
