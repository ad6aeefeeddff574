//! Non-Maximum Suppression (NMS) を行うモジュール
//!
//! スコアの高い順に候補を採用し、採用済みの候補との IoU が閾値を超える候補を取り除きます。
//! 結果は入力における候補のインデックスで返します。

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

use anyhow::{Context, Result};
use log::{debug, trace};

use crate::bbox::{BBox, CoordConvention, Detection, ScoredBox};
use crate::error::NmsError;

/// 2つのBBoxの IoU (Intersection over Union) を計算します。
///
/// # Args
///
/// * `a`, `b` - 比較するBBox
/// * `convention` - 座標系の取り扱い
///
/// # Return
/// * IoU。和集合の面積が 0 の場合は 0
pub fn iou(a: &BBox, b: &BBox, convention: CoordConvention) -> f32 {
    overlap(a, a.area_f64(convention), b, b.area_f64(convention), convention)
}

// 面積は f64 で持つ。f32 だと極端に大きな箱で inf - inf = NaN になる
fn overlap(a: &BBox, area_a: f64, b: &BBox, area_b: f64, convention: CoordConvention) -> f32 {
    let inter = a.intersection_f64(b, convention);
    let union = area_a + area_b - inter;
    if union <= 0. {
        return 0.0;
    }
    (inter / union) as f32
}

/// 閾値と全候補のジオメトリを検証します。最初に見つかった不正な入力を返します。
///
/// 座標に NaN や ±inf を含む箱も `InvalidGeometry` になります。
pub fn validate(candidates: &[ScoredBox], threshold: f32) -> Result<(), NmsError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(NmsError::InvalidThreshold(threshold));
    }
    match candidates.iter().position(|c| !c.bbox.is_valid()) {
        Some(index) => Err(NmsError::InvalidGeometry {
            index,
            bbox: candidates[index].bbox,
        }),
        None => Ok(()),
    }
}

/// スコアの降順。NaN は最も低いスコアとして扱う
fn by_score_desc(a: f32, b: f32) -> Ordering {
    match b.partial_cmp(&a) {
        Some(ord) => ord,
        None => a.is_nan().cmp(&b.is_nan()),
    }
}

/// スコアの降順に並べたインデックスを返します。同スコアはインデックスの昇順
fn score_order(candidates: &[ScoredBox]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        by_score_desc(candidates[a].score, candidates[b].score).then(a.cmp(&b))
    });
    order
}

/// 検証済みの候補に対して貪欲法で抑制を行います。
fn greedy(candidates: &[ScoredBox], threshold: f32, convention: CoordConvention) -> Vec<usize> {
    let areas: Vec<f64> = candidates
        .iter()
        .map(|c| c.bbox.area_f64(convention))
        .collect();

    let mut live: VecDeque<usize> = score_order(candidates).into();
    let mut keep = vec![];

    while let Some(i) = live.pop_front() {
        keep.push(i);
        let head = &candidates[i].bbox;
        live.retain(|&j| {
            let ovr = overlap(head, areas[i], &candidates[j].bbox, areas[j], convention);
            if ovr > threshold {
                trace!("suppress {} by {}: iou = {}", j, i, ovr);
                false
            } else {
                true
            }
        });
    }
    keep
}

/// 画素座標系 ([`CoordConvention::Discrete`]) で NMS を行います。
///
/// # Args
///
/// * `candidates` - 候補。インデックスは入力順
/// * `threshold` - IoU の閾値 ([0, 1])。IoU がこれを超える候補を抑制し、等しい場合は残す
///
/// # Return
/// * 残った候補のインデックス。スコアの降順 (同スコアはインデックスの昇順)
pub fn suppress(candidates: &[ScoredBox], threshold: f32) -> Result<Vec<usize>, NmsError> {
    suppress_with(candidates, threshold, CoordConvention::Discrete)
}

/// 座標系を指定して NMS を行います。
///
/// 入力は抑制処理の前にすべて検証されます。
pub fn suppress_with(
    candidates: &[ScoredBox],
    threshold: f32,
    convention: CoordConvention,
) -> Result<Vec<usize>, NmsError> {
    validate(candidates, threshold)?;

    let keep = greedy(candidates, threshold, convention);
    debug!(
        "nms: {} candidates -> {} kept (threshold {})",
        candidates.len(),
        keep.len(),
        threshold
    );
    Ok(keep)
}

/// クラスごとに NMS を適用し、重なっているBBoxの中でコンフィデンスが最大のものを集めます。
///
/// 異なるクラスの候補同士は抑制し合いません。
///
/// # Args
///
/// * `detections` - クラスラベル付きの候補
/// * `threshold` - IoU の閾値
/// * `convention` - 座標系の取り扱い
///
/// # Return
/// * 残った候補のインデックス。全クラスを通してスコアの降順 (同スコアはインデックスの昇順)
pub fn suppress_by_class(
    detections: &[Detection],
    threshold: f32,
    convention: CoordConvention,
) -> Result<Vec<usize>, NmsError> {
    let candidates: Vec<ScoredBox> = detections.iter().map(|d| d.scored).collect();
    validate(&candidates, threshold)?;

    // クラス別に分割
    let mut classes: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
    for (idx, d) in detections.iter().enumerate() {
        classes.entry(d.class).or_default().push(idx);
    }

    let mut keep: Vec<usize> = classes
        .values()
        .flat_map(|members| {
            let group: Vec<ScoredBox> = members.iter().map(|&i| candidates[i]).collect();
            greedy(&group, threshold, convention)
                .into_iter()
                .map(|k| members[k])
                .collect::<Vec<_>>()
        })
        .collect();
    keep.sort_by(|&a, &b| {
        by_score_desc(candidates[a].score, candidates[b].score).then(a.cmp(&b))
    });

    debug!(
        "nms: {} candidates in {} classes -> {} kept (threshold {})",
        detections.len(),
        classes.len(),
        keep.len(),
        threshold
    );
    Ok(keep)
}

/// スコアが `min_score` を超える候補のインデックスを返します。
pub fn filter_by_score(candidates: &[ScoredBox], min_score: f32) -> Vec<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.score > min_score)
        .map(|(i, _)| i)
        .collect()
}

/// `kept` の順に `items` の要素を取り出します。
///
/// # Args
///
/// * `items` - 候補と同じ並びのデータ (スコアやBBoxなど)
/// * `kept` - 取り出すインデックス
///
/// # Return
/// * `kept` と同じ順序の要素。範囲外のインデックスがあればエラー
pub fn select<T: Copy>(items: &[T], kept: &[usize]) -> Result<Vec<T>> {
    kept.iter()
        .map(|&i| {
            items
                .get(i)
                .copied()
                .with_context(|| format!("index {} out of range (len {})", i, items.len()))
        })
        .collect()
}

/// 残った候補のインデックスを元のスコアに対応付けます。
///
/// 2段目の NMS に渡すスコア列を作るために使います。
pub fn map_scores(scores: &[f32], kept: &[usize]) -> Result<Vec<f32>> {
    select(scores, kept).context("map_scores")
}

/// 残った候補を実体化します。
pub fn materialize(candidates: &[ScoredBox], kept: &[usize]) -> Result<Vec<ScoredBox>> {
    select(candidates, kept)
}
