//! 検出結果を画像に描画するモジュール

use image::{Pixel, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use crate::bbox::{Detection, ScoredBox};

const COLORS: [[u8; 3]; 10] = [
    [255, 0, 0],
    [255, 255, 0],
    [0, 0, 255],
    [14, 23, 50],
    [28, 105, 80],
    [190, 159, 53],
    [46, 194, 148],
    [242, 30, 131],
    [97, 101, 198],
    [115, 11, 87],
];

/// 画像上に水平または垂直な線を描画します。
///
/// # Args
///
/// * `img` - 線を描画する画像 (in-place)
/// * `x1`, `y1`, `x2`, `y2` - 線の始点と終点の座標
/// * `thickness` - 線の太さ
/// * `color` - 線の色
fn draw_line(
    img: &mut RgbImage,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    thickness: f32,
    color: Rgb<u8>,
) {
    let thickness = thickness.max(1.);
    let (bx, by) = (x1 - (thickness / 2.).floor(), y1 - (thickness / 2.).floor());

    let (w, h) = if x1 == x2 {
        (thickness, (y2 - y1).abs() + thickness)
    } else {
        ((x2 - x1).abs() + thickness, thickness)
    };

    let rect = Rect::at(bx as i32, by as i32).of_size(w as u32, h as u32);
    draw_filled_rect_mut(img, rect, color);
}

/// 画像上に矩形の枠を描画します。画像からはみ出した部分は描画されません。
fn draw_rect(img: &mut RgbImage, d: &ScoredBox, thickness: f32, color: Rgb<u8>) {
    let x1 = d.bbox.left.round();
    let y1 = d.bbox.top.round();
    let x2 = d.bbox.right.round();
    let y2 = d.bbox.bottom.round();

    draw_line(img, x1, y1, x1, y2, thickness, color);
    draw_line(img, x1, y2, x2, y2, thickness, color);
    draw_line(img, x1, y1, x2, y1, thickness, color);
    draw_line(img, x2, y1, x2, y2, thickness, color);
}

/// 画像上にバウンディングボックスを描画します。
///
/// スコアの低いものから描画するので、重なった部分にはスコアの高い枠が残ります。
///
/// # Args
///
/// * `img` - バウンディングボックスを描画する画像 (in-place)
/// * `detections` - NMS 後の検出結果
/// * `line_thickness` - 線の太さ
/// * `color` - 線の色
pub fn draw_detections(
    img: &mut RgbImage,
    detections: &[ScoredBox],
    line_thickness: f32,
    color: Rgb<u8>,
) {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| a.score.total_cmp(&b.score));

    for d in sorted.iter() {
        draw_rect(img, d, line_thickness, color);
    }
}

/// クラスごとに色を変えてバウンディングボックスを描画します。
///
/// # Args
///
/// * `img` - バウンディングボックスを描画する画像 (in-place)
/// * `detections` - クラスラベル付きの検出結果
/// * `line_thickness` - 線の太さ
pub fn draw_class_detections(img: &mut RgbImage, detections: &[Detection], line_thickness: f32) {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| a.scored.score.total_cmp(&b.scored.score));

    for d in sorted.iter() {
        let color: Rgb<u8> = *Rgb::from_slice(&COLORS[d.class as usize % COLORS.len()]);
        draw_rect(img, &d.scored, line_thickness, color);
    }
}
