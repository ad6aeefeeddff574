//! NMS で残った領域を特徴マップから切り出すモジュール

use anyhow::{ensure, Result};
use log::debug;

use crate::bbox::BBox;

/// 1枚の画像に対する特徴マップ
///
/// `data` はチャネルごとに行優先で並んだ `channels * height * width` 要素
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl FeatureMap {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        ensure!(
            data.len() == channels * height * width,
            "feature map data length ({}) does not match {}x{}x{}",
            data.len(),
            channels,
            height,
            width
        );
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn at(&self, c: usize, row: usize, col: usize) -> f32 {
        self.data[c * self.height * self.width + row * self.width + col]
    }
}

/// 切り出した特徴の集まり
///
/// 領域ごとに、チャネル・行・列の順で `data` に連結されています。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Crops {
    pub channels: usize,
    /// 各領域の (行数, 列数)
    pub shapes: Vec<(usize, usize)>,
    pub data: Vec<f32>,
    offsets: Vec<usize>,
}

impl Crops {
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// `idx` 番目の領域の特徴を返します。
    pub fn get(&self, idx: usize) -> Option<&[f32]> {
        let start = *self.offsets.get(idx)?;
        let (rows, cols) = *self.shapes.get(idx)?;
        self.data.get(start..start + self.channels * rows * cols)
    }
}

/// 画素座標の領域 (境界を含む) を特徴マップ上の行・列の範囲に変換します。
fn roi_to_pixels(roi: &BBox, fm: &FeatureMap) -> Result<(usize, usize, usize, usize)> {
    ensure!(roi.is_valid(), "invalid roi: {:?}", roi);
    ensure!(
        roi.left >= 0. && roi.top >= 0.,
        "roi must not have negative coordinates: {:?}",
        roi
    );
    let (left, top) = (roi.left.floor() as usize, roi.top.floor() as usize);
    let (right, bottom) = (roi.right.floor() as usize, roi.bottom.floor() as usize);
    ensure!(
        right < fm.width && bottom < fm.height,
        "roi {:?} exceeds feature map {}x{}",
        roi,
        fm.width,
        fm.height
    );
    Ok((left, top, right, bottom))
}

/// NMS で残った領域を特徴マップから切り出します。
///
/// # Args
/// * `rois` - 切り出す領域 (画素座標、右端・下端を含む)
/// * `feature_map` - 特徴マップ
///
/// # Return
/// * 切り出した特徴。領域が特徴マップからはみ出している場合はエラー
pub fn crop(rois: &[BBox], feature_map: &FeatureMap) -> Result<Crops> {
    let (channels, height, width) = (
        feature_map.channels,
        feature_map.height,
        feature_map.width,
    );
    ensure!(
        feature_map.data.len() == channels * height * width,
        "feature map data length ({}) does not match {}x{}x{}",
        feature_map.data.len(),
        channels,
        height,
        width
    );

    let mut crops = Crops {
        channels: feature_map.channels,
        ..Default::default()
    };

    for roi in rois {
        let (left, top, right, bottom) = roi_to_pixels(roi, feature_map)?;
        crops.offsets.push(crops.data.len());
        crops.shapes.push((bottom - top + 1, right - left + 1));

        for c in 0..feature_map.channels {
            for row in top..=bottom {
                crops
                    .data
                    .extend((left..=right).map(|col| feature_map.at(c, row, col)));
            }
        }
    }

    debug!(
        "crop: {} rois, {} values from {}x{}x{} feature map",
        crops.len(),
        crops.data.len(),
        feature_map.channels,
        feature_map.height,
        feature_map.width
    );
    Ok(crops)
}
