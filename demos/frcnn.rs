use anyhow::Result;
use std::time::Instant;

use rcnn_nms::bbox::{BBox, ScoredBox};
use rcnn_nms::crop::{Crops, FeatureMap};
use rcnn_nms::img_proc::draw_detections;
use rcnn_nms::pipeline::{PipelineConfig, TwoStagePipeline};

fn main() -> Result<()> {
    env_logger::init();

    // 設定ファイルが指定されていれば読み込む
    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    let pipeline = TwoStagePipeline::new(config)?;

    // RPN の出力の代わり
    let proposals = vec![
        BBox::new(12., 84., 140., 212.),
        BBox::new(24., 84., 152., 212.),
        BBox::new(36., 84., 164., 212.),
        BBox::new(12., 96., 140., 224.),
        BBox::new(24., 96., 152., 224.),
        BBox::new(24., 108., 152., 236.),
    ];
    let scores: Vec<f32> = vec![0.5, 0.7, 0.88, 0.3, 0.66, 0.9];
    let (h, w) = (256, 256);
    let feature_map = FeatureMap::new(1, h, w, vec![0.5; h * w])?;

    // 分類器の代わりに ROI の中心を保ったまま少し縮める
    let mut classifier = |crops: &Crops, rois: &[ScoredBox]| -> Result<Vec<BBox>> {
        println!("cropped {} rois, {} values", crops.len(), crops.data.len());
        Ok(rois
            .iter()
            .map(|r| {
                let b = r.bbox;
                BBox::from_center(
                    (b.left + b.right) / 2.,
                    (b.top + b.bottom) / 2.,
                    (b.right - b.left) * 0.9,
                    (b.bottom - b.top) * 0.9,
                )
            })
            .collect())
    };

    let start = Instant::now();

    let result = pipeline.run(&proposals, &scores, &feature_map, &mut classifier)?;

    let end = start.elapsed();
    let t = end.as_secs_f64() * 1000.0;
    println!("{:?}", result);
    println!("Processing time:{:.03}ms", t);

    let mut rgb_img = image::RgbImage::new(w as u32, h as u32);
    draw_detections(&mut rgb_img, &result, 2., image::Rgb([255, 0, 0]));

    // 画像を保存
    std::fs::create_dir_all("./out")?;
    rgb_img.save("./out/out.png")?;

    Ok(())
}
