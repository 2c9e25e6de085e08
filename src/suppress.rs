// 该文件是 Xiling （西岭） 项目的一部分。
// src/suppress.rs - 非极大值抑制与检测数量限制
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  boxes::{BBox, contains, iou, is_degenerate},
  config::TestConfig,
  detector::ImageDetections,
  record::AllBoxes,
};

/// 检测结果，类别由其在检测表中的位置决定
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub bbox: BBox,
  pub score: f32,
}

impl Detection {
  pub fn new(bbox: BBox, score: f32) -> Self {
    Self { bbox, score }
  }
}

/// 嵌套框移除策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoveOption {
  /// 分数不同时移除分数较低者，分数相同时移除被包含者
  LowerScore,
  /// 总是移除被包含者
  Contained,
}

/// 贪心 NMS，返回保留下来的下标，按选中顺序排列
///
/// 分数相同时保持输入顺序。
pub fn nms(dets: &[Detection], thresh: f32) -> Vec<usize> {
  let mut order: Vec<usize> = (0..dets.len()).collect();
  order.sort_by(|&a, &b| dets[b].score.total_cmp(&dets[a].score));

  let mut alive = vec![true; dets.len()];
  let mut keep = Vec::new();
  for (pos, &i) in order.iter().enumerate() {
    if !alive[i] {
      continue;
    }
    keep.push(i);

    for &j in &order[pos + 1..] {
      if alive[j] && iou(&dets[i].bbox, &dets[j].bbox) > thresh {
        alive[j] = false;
      }
    }
  }

  keep
}

/// 取出某一类别中分数高于阈值的检测
pub fn class_detections(
  detections: &ImageDetections,
  class: usize,
  score_thresh: f32,
) -> Vec<Detection> {
  let scores = detections.class_scores(class);
  let boxes = detections.class_boxes(class);

  scores
    .iter()
    .zip(boxes.outer_iter())
    .filter(|&(&score, _)| score > score_thresh)
    .map(|(&score, bbox)| Detection::new([bbox[0], bbox[1], bbox[2], bbox[3]], score))
    .collect()
}

/// 丢弃退化框以及分数不高于检测阈值的检测
pub fn filter_valid(dets: Vec<Detection>, det_threshold: f32) -> Vec<Detection> {
  dets
    .into_iter()
    .filter(|det| !is_degenerate(&det.bbox) && det.score > det_threshold)
    .collect()
}

/// 过滤后做 NMS，结果按选中顺序排列
pub fn suppress_class(dets: Vec<Detection>, nms_thresh: f32, det_threshold: f32) -> Vec<Detection> {
  let dets = filter_valid(dets, det_threshold);
  nms(&dets, nms_thresh).into_iter().map(|i| dets[i]).collect()
}

/// 限制一张图像跨类别的检测总数
///
/// 超过 `max_per_image` 时以第 `max_per_image` 高的分数为阈值，各类别保留不低于阈值的检测，
/// 与阈值相等的检测全部保留。第 0 类不参与。返回使用的阈值。
pub fn cap_detections(per_class: &mut [Vec<Detection>], max_per_image: usize) -> Option<f32> {
  if max_per_image == 0 {
    return None;
  }

  let mut scores: Vec<f32> = per_class
    .iter()
    .skip(1)
    .flat_map(|dets| dets.iter().map(|det| det.score))
    .collect();
  if scores.len() <= max_per_image {
    return None;
  }

  scores.sort_by(|a, b| b.total_cmp(a));
  let thresh = scores[max_per_image - 1];
  for dets in per_class.iter_mut().skip(1) {
    dets.retain(|det| det.score >= thresh);
  }

  Some(thresh)
}

/// 移除被其他框包含的框，返回保留的下标（升序）
///
/// 按下标顺序遍历，已移除的框不再参与比较。分数相同时移除被包含者，
/// 两个框完全相同时先出现的保留。
pub fn remove_embedded(dets: &[Detection], option: RemoveOption) -> Vec<usize> {
  let n = dets.len();
  let mut alive = vec![true; n];

  for i in 0..n {
    if !alive[i] {
      continue;
    }
    for j in 0..n {
      if j == i || !alive[j] {
        continue;
      }
      if !contains(&dets[i].bbox, &dets[j].bbox, 0.0) {
        continue;
      }

      match option {
        RemoveOption::LowerScore if dets[i].score != dets[j].score => {
          if dets[i].score > dets[j].score {
            alive[j] = false;
          } else {
            alive[i] = false;
          }
        }
        _ => alive[j] = false,
      }
    }
  }

  (0..n).filter(|&i| alive[i]).collect()
}

/// 在同一图像的所有类别之间移除嵌套框，返回移除数量
pub fn remove_embedded_across_classes(
  per_class: &mut [Vec<Detection>],
  option: RemoveOption,
) -> usize {
  let mut flat = Vec::new();
  let mut owner = Vec::new();
  for (class, dets) in per_class.iter().enumerate() {
    for (k, det) in dets.iter().enumerate() {
      flat.push(*det);
      owner.push((class, k));
    }
  }

  let kept = remove_embedded(&flat, option);
  let removed = flat.len() - kept.len();
  if removed == 0 {
    return 0;
  }

  let mut rebuilt: Vec<Vec<Detection>> = vec![Vec::new(); per_class.len()];
  for i in kept {
    let (class, k) = owner[i];
    rebuilt[class].push(per_class[class][k]);
  }
  for (dets, kept) in per_class.iter_mut().zip(rebuilt) {
    *dets = kept;
  }

  removed
}

/// 一张图像的后处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct SuppressedImage {
  /// 按类别排列的检测，第 0 类为空
  pub per_class: Vec<Vec<Detection>>,
  /// 通过初始分数阈值的候选数量
  pub candidates: usize,
  /// 嵌套框移除的数量
  pub removed: usize,
}

impl SuppressedImage {
  pub fn total(&self) -> usize {
    self.per_class.iter().map(Vec::len).sum()
  }
}

/// 对一张图像逐类别做阈值过滤与 NMS，再按配置移除嵌套框并限制总数
pub fn suppress_image(detections: &ImageDetections, config: &TestConfig) -> SuppressedImage {
  let num_classes = detections.num_classes();
  let mut per_class = vec![Vec::new(); num_classes];
  let mut candidates = 0;

  // 跳过第 0 类（背景）
  for (class, slot) in per_class.iter_mut().enumerate().skip(1) {
    let dets = class_detections(detections, class, config.score_thresh);
    candidates += dets.len();
    *slot = suppress_class(dets, config.nms, config.det_threshold);
  }

  let removed = match config.embedded_removal {
    Some(option) => remove_embedded_across_classes(&mut per_class, option),
    None => 0,
  };

  if let Some(thresh) = cap_detections(&mut per_class, config.max_per_image) {
    debug!("检测数量超过 {}, 分数阈值 {:.4}", config.max_per_image, thresh);
  }

  SuppressedImage {
    per_class,
    candidates,
    removed,
  }
}

/// 对整张检测表重新做过滤与 NMS
pub fn apply_nms(all_boxes: &AllBoxes, nms_thresh: f32, det_threshold: f32) -> AllBoxes {
  let mut result = AllBoxes::new(all_boxes.num_classes(), all_boxes.num_images());
  for class in 0..all_boxes.num_classes() {
    for image in 0..all_boxes.num_images() {
      let dets = all_boxes.get(class, image);
      if dets.is_empty() {
        continue;
      }
      result.set(
        class,
        image,
        suppress_class(dets.to_vec(), nms_thresh, det_threshold),
      );
    }
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  fn det(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Detection {
    Detection::new([x1, y1, x2, y2], score)
  }

  fn scenario() -> Vec<Detection> {
    vec![
      det(0.0, 0.0, 10.0, 10.0, 0.9),
      det(1.0, 1.0, 11.0, 11.0, 0.85),
      det(50.0, 50.0, 60.0, 60.0, 0.7),
    ]
  }

  #[test]
  fn nms_suppresses_overlapping_box() {
    let dets = scenario();
    let keep = nms(&dets, 0.5);
    assert_eq!(keep, vec![0, 2]);
  }

  #[test]
  fn nms_returns_selection_order() {
    let dets = vec![
      det(50.0, 50.0, 60.0, 60.0, 0.2),
      det(0.0, 0.0, 10.0, 10.0, 0.9),
      det(20.0, 20.0, 30.0, 30.0, 0.5),
    ];
    assert_eq!(nms(&dets, 0.3), vec![1, 2, 0]);
  }

  #[test]
  fn nms_keeps_first_on_equal_scores() {
    let dets = vec![det(0.0, 0.0, 10.0, 10.0, 0.5), det(0.0, 0.0, 10.0, 10.0, 0.5)];
    assert_eq!(nms(&dets, 0.5), vec![0]);
  }

  #[test]
  fn cap_keeps_highest_score() {
    let mut per_class = vec![
      Vec::new(),
      suppress_class(scenario(), 0.5, 0.0),
    ];
    assert_eq!(per_class[1].len(), 2);

    let thresh = cap_detections(&mut per_class, 1);
    assert_eq!(thresh, Some(0.9));
    assert_eq!(per_class[1], vec![det(0.0, 0.0, 10.0, 10.0, 0.9)]);
  }

  #[test]
  fn cap_spans_classes_and_keeps_ties() {
    let mut per_class = vec![
      Vec::new(),
      vec![det(0.0, 0.0, 1.0, 1.0, 0.8), det(0.0, 0.0, 2.0, 2.0, 0.5)],
      vec![det(0.0, 0.0, 3.0, 3.0, 0.5), det(0.0, 0.0, 4.0, 4.0, 0.1)],
    ];
    let thresh = cap_detections(&mut per_class, 2);
    assert_eq!(thresh, Some(0.5));
    assert_eq!(per_class[1].len(), 2);
    assert_eq!(per_class[2], vec![det(0.0, 0.0, 3.0, 3.0, 0.5)]);
  }

  #[test]
  fn cap_disabled_or_not_exceeded() {
    let mut per_class = vec![Vec::new(), scenario()];
    assert_eq!(cap_detections(&mut per_class, 0), None);
    assert_eq!(cap_detections(&mut per_class, 3), None);
    assert_eq!(per_class[1].len(), 3);
  }

  #[test]
  fn filter_drops_degenerate_and_low_scores() {
    let dets = vec![
      det(0.0, 0.0, 0.0, 10.0, 0.9),
      det(0.0, 0.0, 10.0, -1.0, 0.9),
      det(0.0, 0.0, 10.0, 10.0, 0.1),
      det(0.0, 0.0, 10.0, 10.0, 0.6),
    ];
    assert_eq!(filter_valid(dets, 0.5), vec![det(0.0, 0.0, 10.0, 10.0, 0.6)]);
  }

  #[test]
  fn embedded_lower_score_removes_weaker_box() {
    let dets = vec![
      det(0.0, 0.0, 100.0, 100.0, 0.4),
      det(10.0, 10.0, 20.0, 20.0, 0.9),
      det(200.0, 200.0, 210.0, 210.0, 0.3),
    ];
    assert_eq!(remove_embedded(&dets, RemoveOption::LowerScore), vec![1, 2]);
    assert_eq!(remove_embedded(&dets, RemoveOption::Contained), vec![0, 2]);
  }

  #[test]
  fn embedded_tie_keeps_first_seen() {
    let dets = vec![det(0.0, 0.0, 10.0, 10.0, 0.5), det(0.0, 0.0, 10.0, 10.0, 0.5)];
    assert_eq!(remove_embedded(&dets, RemoveOption::LowerScore), vec![0]);

    let dets = vec![det(2.0, 2.0, 8.0, 8.0, 0.5), det(0.0, 0.0, 10.0, 10.0, 0.5)];
    assert_eq!(remove_embedded(&dets, RemoveOption::LowerScore), vec![1]);
  }

  #[test]
  fn embedded_across_classes_keeps_class_layout() {
    let mut per_class = vec![
      Vec::new(),
      vec![det(0.0, 0.0, 100.0, 100.0, 0.9), det(300.0, 300.0, 310.0, 310.0, 0.2)],
      vec![det(10.0, 10.0, 20.0, 20.0, 0.5)],
    ];
    let removed = remove_embedded_across_classes(&mut per_class, RemoveOption::LowerScore);
    assert_eq!(removed, 1);
    assert_eq!(per_class[1].len(), 2);
    assert!(per_class[2].is_empty());
  }

  #[test]
  fn suppress_image_runs_every_stage() {
    let detections = ImageDetections {
      scores: array![[0.1f32, 0.9], [0.15, 0.85], [0.3, 0.7], [0.97, 0.03]],
      boxes: array![
        [0.0f32, 0.0, 10.0, 10.0, 0.0, 0.0, 10.0, 10.0],
        [1.0, 1.0, 11.0, 11.0, 1.0, 1.0, 11.0, 11.0],
        [50.0, 50.0, 60.0, 60.0, 50.0, 50.0, 60.0, 60.0],
        [0.0, 0.0, 5.0, 5.0, 0.0, 0.0, 5.0, 5.0],
      ],
    };
    let config = TestConfig {
      nms: 0.5,
      ..Default::default()
    };
    let result = suppress_image(&detections, &config);

    assert!(result.per_class[0].is_empty());
    assert_eq!(result.candidates, 3);
    assert_eq!(result.removed, 0);
    assert_eq!(
      result.per_class[1],
      vec![det(0.0, 0.0, 10.0, 10.0, 0.9), det(50.0, 50.0, 60.0, 60.0, 0.7)]
    );

    let config = TestConfig {
      nms: 0.5,
      max_per_image: 1,
      ..Default::default()
    };
    let result = suppress_image(&detections, &config);
    assert_eq!(result.total(), 1);
    assert_eq!(result.per_class[1], vec![det(0.0, 0.0, 10.0, 10.0, 0.9)]);
  }

  #[test]
  fn embedded_removal_runs_before_cap() {
    let detections = ImageDetections {
      scores: array![[0.05f32, 0.9, 0.05], [0.15, 0.05, 0.8], [0.25, 0.05, 0.7]],
      boxes: array![
        [0.0f32, 0.0, 100.0, 100.0, 0.0, 0.0, 100.0, 100.0, 0.0, 0.0, 100.0, 100.0],
        [10.0, 10.0, 20.0, 20.0, 10.0, 10.0, 20.0, 20.0, 10.0, 10.0, 20.0, 20.0],
        [200.0, 200.0, 260.0, 260.0, 200.0, 200.0, 260.0, 260.0, 200.0, 200.0, 260.0, 260.0],
      ],
    };

    // 不移除嵌套框时，上限把 0.7 的检测截掉
    let config = TestConfig {
      max_per_image: 2,
      ..Default::default()
    };
    let result = suppress_image(&detections, &config);
    assert_eq!(result.removed, 0);
    assert_eq!(result.per_class[2], vec![det(10.0, 10.0, 20.0, 20.0, 0.8)]);

    let config = TestConfig {
      max_per_image: 2,
      embedded_removal: Some(RemoveOption::LowerScore),
      ..Default::default()
    };
    let result = suppress_image(&detections, &config);
    assert_eq!(result.candidates, 3);
    assert_eq!(result.removed, 1);
    assert_eq!(result.total(), 2);
    assert_eq!(result.per_class[1], vec![det(0.0, 0.0, 100.0, 100.0, 0.9)]);
    assert_eq!(result.per_class[2], vec![det(200.0, 200.0, 260.0, 260.0, 0.7)]);
  }

  #[test]
  fn apply_nms_over_table() {
    let mut all_boxes = AllBoxes::new(2, 2);
    all_boxes.set(1, 0, scenario());
    all_boxes.set(1, 1, vec![det(5.0, 5.0, 5.0, 9.0, 0.9)]);

    let result = apply_nms(&all_boxes, 0.5, 0.0);
    assert_eq!(result.get(1, 0).len(), 2);
    assert!(result.get(1, 1).is_empty());
    assert!(result.get(0, 0).is_empty());
  }
}
