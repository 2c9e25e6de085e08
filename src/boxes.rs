// 该文件是 Xiling （西岭） 项目的一部分。
// src/boxes.rs - 边界框几何变换
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

use ndarray::{Array2, ArrayView2, s};

/// 边界框 [x1, y1, x2, y2]
pub type BBox = [f32; 4];

pub fn width(bbox: &BBox) -> f32 {
  bbox[2] - bbox[0]
}

pub fn height(bbox: &BBox) -> f32 {
  bbox[3] - bbox[1]
}

pub fn area(bbox: &BBox) -> f32 {
  width(bbox).max(0.0) * height(bbox).max(0.0)
}

/// 宽或高不为正的框视为退化框
pub fn is_degenerate(bbox: &BBox) -> bool {
  !(width(bbox) > 0.0 && height(bbox) > 0.0)
}

/// 两个框相交部分的面积
pub fn overlap_area(a: &BBox, b: &BBox) -> f32 {
  let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  w * h
}

/// 计算两个边界框的 IoU
pub fn iou(a: &BBox, b: &BBox) -> f32 {
  let intersection = overlap_area(a, b);
  let union = area(a) + area(b) - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// `inner` 是否落在 `outer` 向四周扩展 `delta` 后的范围内
pub fn contains(outer: &BBox, inner: &BBox, delta: f32) -> bool {
  inner[0] >= outer[0] - delta
    && inner[1] >= outer[1] - delta
    && inner[2] <= outer[2] + delta
    && inner[3] <= outer[3] + delta
}

/// 将回归量应用到候选框上
///
/// `boxes` 为 N x 4，`deltas` 为 N x 4K，每个类别一组 (dx, dy, dw, dh)，
/// 返回 N x 4K 的预测框。宽或高为零的输入会得到退化框，由调用方过滤。
pub fn decode_boxes(boxes: ArrayView2<f32>, deltas: ArrayView2<f32>) -> Array2<f32> {
  debug_assert_eq!(boxes.nrows(), deltas.nrows());
  let (rows, cols) = deltas.dim();
  let mut pred = Array2::<f32>::zeros((rows, cols));

  for ((bbox, delta), mut out) in boxes
    .outer_iter()
    .zip(deltas.outer_iter())
    .zip(pred.outer_iter_mut())
  {
    let w = bbox[2] - bbox[0];
    let h = bbox[3] - bbox[1];
    let cx = bbox[0] + 0.5 * w;
    let cy = bbox[1] + 0.5 * h;

    for k in 0..cols / 4 {
      let (dx, dy, dw, dh) = (
        delta[4 * k],
        delta[4 * k + 1],
        delta[4 * k + 2],
        delta[4 * k + 3],
      );

      let pred_cx = cx + dx * w;
      let pred_cy = cy + dy * h;
      let pred_w = w * dw.exp();
      let pred_h = h * dh.exp();

      out[4 * k] = pred_cx - 0.5 * pred_w;
      out[4 * k + 1] = pred_cy - 0.5 * pred_h;
      out[4 * k + 2] = pred_cx + 0.5 * pred_w;
      out[4 * k + 3] = pred_cy + 0.5 * pred_h;
    }
  }

  pred
}

/// 不做回归时，每个类别重复一份原始框
pub fn tile_boxes(boxes: ArrayView2<f32>, num_classes: usize) -> Array2<f32> {
  let mut tiled = Array2::<f32>::zeros((boxes.nrows(), 4 * num_classes));
  for k in 0..num_classes {
    tiled
      .slice_mut(s![.., 4 * k..4 * k + 4])
      .assign(&boxes.slice(s![.., 0..4]));
  }
  tiled
}

/// 将框裁剪到图像范围内，`image_shape` 为 (高, 宽)
pub fn clip_boxes(mut boxes: Array2<f32>, image_shape: (usize, usize)) -> Array2<f32> {
  let max_x = image_shape.1 as f32 - 1.0;
  let max_y = image_shape.0 as f32 - 1.0;

  for mut row in boxes.outer_iter_mut() {
    for (j, value) in row.iter_mut().enumerate() {
      let upper = if j % 2 == 0 { max_x } else { max_y };
      *value = value.max(0.0).min(upper);
    }
  }

  boxes
}

/// 按每行所属金字塔层的缩放系数把框还原到原图坐标
pub fn rescale_boxes(mut boxes: Array2<f32>, levels: &[usize], scales: &[f32]) -> Array2<f32> {
  for (mut row, &level) in boxes.outer_iter_mut().zip(levels) {
    let scale = scales[level];
    row.mapv_inplace(|v| v / scale);
  }
  boxes
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn clip_uses_inclusive_pixel_bounds() {
    let boxes = array![[-5.0f32, -3.0, 120.0, 130.0]];
    let clipped = clip_boxes(boxes, (100, 90));
    assert_eq!(clipped, array![[0.0f32, 0.0, 89.0, 99.0]]);
  }

  #[test]
  fn clip_covers_every_class_column() {
    let boxes = array![[-1.0f32, -1.0, 50.0, 50.0, 5.0, 5.0, 8.0, 200.0]];
    let clipped = clip_boxes(boxes, (20, 30));
    assert_eq!(clipped, array![[0.0f32, 0.0, 29.0, 19.0, 5.0, 5.0, 8.0, 19.0]]);
  }

  #[test]
  fn identity_delta_reproduces_boxes() {
    let boxes = array![[0.0f32, 0.0, 10.0, 10.0], [4.0, 6.0, 36.0, 20.0]];
    let deltas = Array2::<f32>::zeros((2, 8));
    let pred = decode_boxes(boxes.view(), deltas.view());
    assert_eq!(pred.slice(s![.., 0..4]), boxes);
    assert_eq!(pred.slice(s![.., 4..8]), boxes);
  }

  #[test]
  fn decode_shifts_and_scales() {
    let boxes = array![[0.0f32, 0.0, 10.0, 20.0]];
    let deltas = array![[0.5f32, -0.25, 2.0f32.ln(), 0.0]];
    let pred = decode_boxes(boxes.view(), deltas.view());
    let expected = [0.0f32, -5.0, 20.0, 15.0];
    for (got, want) in pred.row(0).iter().zip(expected) {
      assert!((got - want).abs() < 1e-4, "{got} != {want}");
    }
  }

  #[test]
  fn zero_width_decodes_to_degenerate() {
    let boxes = array![[5.0f32, 5.0, 5.0, 9.0]];
    let deltas = array![[0.3f32, 0.1, 0.7, 0.2]];
    let pred = decode_boxes(boxes.view(), deltas.view());
    let bbox = [pred[[0, 0]], pred[[0, 1]], pred[[0, 2]], pred[[0, 3]]];
    assert!(is_degenerate(&bbox));
  }

  #[test]
  fn tile_repeats_per_class() {
    let boxes = array![[1.0f32, 2.0, 3.0, 4.0]];
    let tiled = tile_boxes(boxes.view(), 3);
    assert_eq!(tiled, array![[1.0f32, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0]]);
  }

  #[test]
  fn rescale_divides_by_level_scale() {
    let boxes = array![[10.0f32, 10.0, 20.0, 20.0], [10.0, 10.0, 20.0, 20.0]];
    let out = rescale_boxes(boxes, &[0, 1], &[2.0, 0.5]);
    assert_eq!(out, array![[5.0f32, 5.0, 10.0, 10.0], [20.0, 20.0, 40.0, 40.0]]);
  }

  #[test]
  fn iou_of_shifted_squares() {
    let a = [0.0, 0.0, 10.0, 10.0];
    let b = [1.0, 1.0, 11.0, 11.0];
    assert!((iou(&a, &b) - 81.0 / 119.0).abs() < 1e-6);
    assert_eq!(iou(&a, &[50.0, 50.0, 60.0, 60.0]), 0.0);
  }

  #[test]
  fn containment_respects_delta() {
    let outer = [0.0, 0.0, 10.0, 10.0];
    assert!(contains(&outer, &[2.0, 2.0, 8.0, 8.0], 0.0));
    assert!(contains(&outer, &outer, 0.0));
    assert!(!contains(&outer, &[-1.0, 2.0, 8.0, 8.0], 0.0));
    assert!(contains(&outer, &[-1.0, 2.0, 8.0, 11.0], 1.0));
  }
}
