// 该文件是 Xiling （西岭） 项目的一部分。
// src/pyramid.rs - 图像金字塔与候选框投影
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

use image::{DynamicImage, Rgb, Rgb32FImage, RgbImage};
use ndarray::{Array2, ArrayView2, s};
use tracing::debug;

use crate::blob::ImageBlob;

/// 选择金字塔层时参照的标准面积 224 x 224
const CANONICAL_AREA: f32 = 224.0 * 224.0;

/// 图像金字塔，下标即层号
#[derive(Debug, Clone)]
pub struct ImagePyramid {
  blob: ImageBlob,
  scales: Vec<f32>,
  image_shape: (usize, usize),
}

impl ImagePyramid {
  /// 减去像素均值后按每个目标尺寸缩放，最长边不超过 `max_size`
  pub fn build(
    image: &RgbImage,
    target_sizes: &[u32],
    max_size: u32,
    pixel_means: [f32; 3],
  ) -> Self {
    let (width, height) = image.dimensions();
    let size_min = width.min(height) as f32;
    let size_max = width.max(height) as f32;

    let normalized = DynamicImage::ImageRgb8(image.clone()).into_rgb32f();

    let mut levels = Vec::with_capacity(target_sizes.len());
    let mut scales = Vec::with_capacity(target_sizes.len());
    for &target in target_sizes {
      let mut scale = target as f32 / size_min;
      if (scale * size_max).round() > max_size as f32 {
        scale = max_size as f32 / size_max;
      }

      let new_width = ((width as f32 * scale).round() as u32).max(1);
      let new_height = ((height as f32 * scale).round() as u32).max(1);
      debug!(
        "金字塔层 {}: 缩放系数 {:.4}, 尺寸 {}x{}",
        scales.len(),
        scale,
        new_width,
        new_height
      );

      let mut level = if (new_width, new_height) == (width, height) {
        normalized.clone()
      } else {
        resize_bilinear(&normalized, new_width, new_height)
      };
      subtract_means(&mut level, pixel_means);
      levels.push(level);
      scales.push(scale);
    }

    Self {
      blob: ImageBlob::from_images(&levels),
      scales,
      image_shape: (height as usize, width as usize),
    }
  }

  pub fn blob(&self) -> &ImageBlob {
    &self.blob
  }

  pub fn scales(&self) -> &[f32] {
    &self.scales
  }

  pub fn num_levels(&self) -> usize {
    self.scales.len()
  }

  /// 原图尺寸 (高, 宽)
  pub fn image_shape(&self) -> (usize, usize) {
    self.image_shape
  }

  /// 候选框网络需要的 [blob 高, blob 宽, 缩放系数]
  pub fn im_info(&self) -> [f32; 3] {
    [
      self.blob.height() as f32,
      self.blob.width() as f32,
      self.scales.first().copied().unwrap_or(1.0),
    ]
  }
}

/// 双线性缩放，采样位置与 OpenCV `INTER_LINEAR` 一致，缩小时不做抗混叠
fn resize_bilinear(src: &Rgb32FImage, width: u32, height: u32) -> Rgb32FImage {
  let (src_width, src_height) = src.dimensions();
  let xs: Vec<(u32, u32, f32)> = (0..width).map(|x| taps(x, src_width, width)).collect();
  let ys: Vec<(u32, u32, f32)> = (0..height).map(|y| taps(y, src_height, height)).collect();

  Rgb32FImage::from_fn(width, height, |x, y| {
    let (x0, x1, wx) = xs[x as usize];
    let (y0, y1, wy) = ys[y as usize];
    let (p00, p10) = (src.get_pixel(x0, y0), src.get_pixel(x1, y0));
    let (p01, p11) = (src.get_pixel(x0, y1), src.get_pixel(x1, y1));

    let mut out = [0.0f32; 3];
    for (c, value) in out.iter_mut().enumerate() {
      let top = p00[c] * (1.0 - wx) + p10[c] * wx;
      let bottom = p01[c] * (1.0 - wx) + p11[c] * wx;
      *value = top * (1.0 - wy) + bottom * wy;
    }
    Rgb(out)
  })
}

/// 目标坐标对应的两个源坐标及第二个的权重
fn taps(dst: u32, src_len: u32, dst_len: u32) -> (u32, u32, f32) {
  let last = src_len.saturating_sub(1);
  let pos = ((dst as f32 + 0.5) * src_len as f32 / dst_len as f32 - 0.5).max(0.0);
  let i0 = (pos.floor() as u32).min(last);
  let i1 = (i0 + 1).min(last);
  (i0, i1, pos - i0 as f32)
}

fn subtract_means(level: &mut Rgb32FImage, pixel_means: [f32; 3]) {
  for pixel in level.pixels_mut() {
    for (value, mean) in pixel.0.iter_mut().zip(pixel_means) {
      *value = *value * 255.0 - mean;
    }
  }
}

/// 把原图坐标下的候选框投影到金字塔中
///
/// 多尺度时为每个框选择缩放后面积最接近 224 x 224 的层；单尺度时全部落在第 0 层。
/// 返回 (层号, 投影后的框)。
pub fn project_rois(rois: ArrayView2<f32>, scales: &[f32]) -> (Vec<usize>, Array2<f32>) {
  let levels: Vec<usize> = if scales.len() > 1 {
    rois
      .outer_iter()
      .map(|roi| {
        let area = (roi[2] - roi[0] + 1.0) * (roi[3] - roi[1] + 1.0);
        let mut best = (0, f32::INFINITY);
        for (level, &scale) in scales.iter().enumerate() {
          let diff = (area * scale * scale - CANONICAL_AREA).abs();
          if diff < best.1 {
            best = (level, diff);
          }
        }
        best.0
      })
      .collect()
  } else {
    vec![0; rois.nrows()]
  };

  let mut projected = rois.slice(s![.., 0..4]).to_owned();
  for (mut row, &level) in projected.outer_iter_mut().zip(&levels) {
    let scale = scales[level];
    row.mapv_inplace(|v| v * scale);
  }

  (levels, projected)
}

/// 组装送入网络的 N x 5 候选框矩阵，每行为 (层号, x1, y1, x2, y2)
pub fn rois_blob(rois: ArrayView2<f32>, scales: &[f32]) -> Array2<f32> {
  let (levels, projected) = project_rois(rois, scales);
  let mut blob = Array2::<f32>::zeros((projected.nrows(), 5));
  for (i, &level) in levels.iter().enumerate() {
    blob[[i, 0]] = level as f32;
  }
  blob.slice_mut(s![.., 1..5]).assign(&projected);
  blob
}
