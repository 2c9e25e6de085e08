// 该文件是 Xiling （西岭） 项目的一部分。
// src/blob.rs - 网络输入张量定义
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

use image::Rgb32FImage;
use ndarray::{Array4, ArrayView3, Axis};

const RGB_CHANNELS: usize = 3;

/// NHWC 格式的浮点图像批
///
/// 每张图像放在左上角，右侧和下方用 0 填充到批内最大尺寸。
#[derive(Debug, Clone)]
pub struct ImageBlob {
  data: Array4<f32>,
}

impl ImageBlob {
  pub fn from_images(images: &[Rgb32FImage]) -> Self {
    let height = images.iter().map(|im| im.height()).max().unwrap_or(0) as usize;
    let width = images.iter().map(|im| im.width()).max().unwrap_or(0) as usize;

    let mut data = Array4::<f32>::zeros((images.len(), height, width, RGB_CHANNELS));
    for (n, image) in images.iter().enumerate() {
      for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..RGB_CHANNELS {
          data[[n, y as usize, x as usize, c]] = pixel[c];
        }
      }
    }

    Self { data }
  }

  pub fn batch(&self) -> usize {
    self.data.dim().0
  }

  pub fn height(&self) -> usize {
    self.data.dim().1
  }

  pub fn width(&self) -> usize {
    self.data.dim().2
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn level(&self, index: usize) -> ArrayView3<'_, f32> {
    self.data.index_axis(Axis(0), index)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn pads_to_largest_image() {
    let small = Rgb32FImage::from_pixel(2, 3, Rgb([1.0, 2.0, 3.0]));
    let large = Rgb32FImage::from_pixel(4, 2, Rgb([-1.0, -1.0, -1.0]));
    let blob = ImageBlob::from_images(&[small, large]);

    assert_eq!(blob.batch(), 2);
    assert_eq!((blob.height(), blob.width(), blob.channels()), (3, 4, 3));
    assert_eq!(blob.level(0)[[2, 1, 2]], 3.0);
    assert_eq!(blob.level(0)[[2, 3, 0]], 0.0);
    assert_eq!(blob.level(1)[[2, 0, 0]], 0.0);
    assert_eq!(blob.level(1)[[1, 3, 1]], -1.0);
  }
}
