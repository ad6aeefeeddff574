//! バウンディングボックスとスコア付き候補を表すモジュール

use serde::{Deserialize, Serialize};

/// 座標系の取り扱い
///
/// 面積と交差幅の計算で境界を含めるかを決めます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordConvention {
    /// 画素単位の座標。右端・下端の画素も含むので幅は `right - left + 1`
    #[default]
    Discrete,
    /// 連続座標。幅は `right - left`
    Continuous,
}

impl CoordConvention {
    /// 区間 [lo, hi] の長さを返します。
    ///
    /// 交差区間のように hi < lo になり得る場合は呼び出し側で 0 に丸めてください。
    pub fn extent(self, lo: f32, hi: f32) -> f32 {
        match self {
            CoordConvention::Discrete => hi - lo + 1.,
            CoordConvention::Continuous => hi - lo,
        }
    }

    /// [`extent`](Self::extent) の f64 版。f32 の範囲を超える幅でも inf にならない
    pub(crate) fn extent_f64(self, lo: f32, hi: f32) -> f64 {
        let (lo, hi) = (f64::from(lo), f64::from(hi));
        match self {
            CoordConvention::Discrete => hi - lo + 1.,
            CoordConvention::Continuous => hi - lo,
        }
    }
}

/// 軸に平行な矩形 (left, top, right, bottom)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    /// 左端のx
    pub left: f32,
    /// 上端のy
    pub top: f32,
    /// 右端のx
    pub right: f32,
    /// 下端のy
    pub bottom: f32,
}

impl BBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// 中心座標とサイズから新しいBBoxを作成します。
    ///
    /// # Args
    ///
    /// * `cx`, `cy` - 中心座標
    /// * `w`, `h` - 幅と高さ
    ///
    /// # Return
    /// * 新たなBBoxインスタンス
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            left: cx - w / 2.,
            top: cy - h / 2.,
            right: cx + w / 2.,
            bottom: cy + h / 2.,
        }
    }

    /// 座標がすべて有限で、right >= left かつ bottom >= top を満たすか
    pub fn is_valid(&self) -> bool {
        [self.left, self.top, self.right, self.bottom]
            .iter()
            .all(|v| v.is_finite())
            && self.right >= self.left
            && self.bottom >= self.top
    }

    pub fn width(&self, convention: CoordConvention) -> f32 {
        convention.extent(self.left, self.right)
    }

    pub fn height(&self, convention: CoordConvention) -> f32 {
        convention.extent(self.top, self.bottom)
    }

    /// 面積を返します。`Discrete` では境界の画素を含むので `Continuous` より大きくなる
    pub fn area(&self, convention: CoordConvention) -> f32 {
        self.width(convention) * self.height(convention)
    }

    /// f64 で計算した面積。IoU の計算はこちらを使う
    pub(crate) fn area_f64(&self, convention: CoordConvention) -> f64 {
        convention.extent_f64(self.left, self.right) * convention.extent_f64(self.top, self.bottom)
    }

    /// 他のBBoxとの交差領域の面積を返します。重ならない場合は 0
    ///
    /// # Args
    ///
    /// * `other` - 比較対象のBBox
    /// * `convention` - 座標系の取り扱い
    pub fn intersection(&self, other: &BBox, convention: CoordConvention) -> f32 {
        let iw = convention
            .extent(
                f32::max(self.left, other.left),
                f32::min(self.right, other.right),
            )
            .max(0.);
        let ih = convention
            .extent(
                f32::max(self.top, other.top),
                f32::min(self.bottom, other.bottom),
            )
            .max(0.);
        iw * ih
    }

    pub(crate) fn intersection_f64(&self, other: &BBox, convention: CoordConvention) -> f64 {
        let iw = convention
            .extent_f64(
                f32::max(self.left, other.left),
                f32::min(self.right, other.right),
            )
            .max(0.);
        let ih = convention
            .extent_f64(
                f32::max(self.top, other.top),
                f32::min(self.bottom, other.bottom),
            )
            .max(0.);
        iw * ih
    }
}

/// スコア付きのバウンディングボックス
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredBox {
    pub bbox: BBox,
    /// コンフィデンス
    pub score: f32,
}

impl ScoredBox {
    pub fn new(bbox: BBox, score: f32) -> Self {
        Self { bbox, score }
    }
}

impl From<(f32, f32, f32, f32, f32)> for ScoredBox {
    /// (left, top, right, bottom, score) のタプルから作成します。
    fn from((left, top, right, bottom, score): (f32, f32, f32, f32, f32)) -> Self {
        Self::new(BBox::new(left, top, right, bottom), score)
    }
}

/// クラスラベル付きの検出結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// クラス
    pub class: u8,
    #[serde(flatten)]
    pub scored: ScoredBox,
}
