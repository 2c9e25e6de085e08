// 该文件是 Xiling （西岭） 项目的一部分。
// src/dataset.rs - 图像数据集
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

use std::path::{Path, PathBuf};

use ndarray::{Array2, Axis};

use crate::record::AllBoxes;

/// 一张图像的候选框，`gt_classes` 为 0 表示非真值框
#[derive(Debug, Clone, PartialEq)]
pub struct Proposals {
  pub boxes: Array2<f32>,
  pub gt_classes: Vec<u32>,
}

impl Proposals {
  /// 去掉真值框，只保留候选框
  pub fn without_ground_truth(&self) -> Array2<f32> {
    let rows: Vec<usize> = (0..self.boxes.nrows())
      .filter(|&i| self.gt_classes.get(i).copied().unwrap_or(0) == 0)
      .collect();
    self.boxes.select(Axis(0), &rows)
  }
}

/// 图像数据集与评估入口
pub trait Dataset {
  type Error;

  fn name(&self) -> &str;

  /// 类别名称，第 0 类为背景
  fn classes(&self) -> &[String];

  fn num_classes(&self) -> usize {
    self.classes().len()
  }

  fn num_images(&self) -> usize;

  fn image_path_at(&self, index: usize) -> PathBuf;

  fn proposals_at(&self, index: usize) -> Option<&Proposals>;

  fn evaluate_detections(&self, all_boxes: &AllBoxes, output_dir: &Path)
  -> Result<(), Self::Error>;
}

#[cfg(feature = "manifest_dataset")]
mod manifest;
#[cfg(feature = "manifest_dataset")]
pub use self::manifest::{ManifestDataset, ManifestDatasetError};

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn drops_ground_truth_rows() {
    let proposals = Proposals {
      boxes: array![[0.0f32, 0.0, 5.0, 5.0], [1.0, 1.0, 6.0, 6.0], [2.0, 2.0, 7.0, 7.0]],
      gt_classes: vec![3, 0, 0],
    };
    assert_eq!(
      proposals.without_ground_truth(),
      array![[1.0f32, 1.0, 6.0, 6.0], [2.0, 2.0, 7.0, 7.0]]
    );
  }

  #[test]
  fn missing_markers_count_as_proposals() {
    let proposals = Proposals {
      boxes: array![[0.0f32, 0.0, 5.0, 5.0]],
      gt_classes: Vec::new(),
    };
    assert_eq!(proposals.without_ground_truth().nrows(), 1);
  }
}
