// 该文件是 Xiling （西岭） 项目的一部分。
// src/dedup.rs - 重复候选框合并
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

use ndarray::{Array2, ArrayView2, Axis};

const HASH_WEIGHTS: [f64; 5] = [1.0, 1e3, 1e6, 1e9, 1e12];

/// 投影后数值相同的候选框只需计算一次特征
///
/// `keep` 按哈希值升序记录每个唯一值第一次出现的行，`inverse` 把每个原始行映射到
/// 它在 `keep` 中的位置。哈希碰撞的不同框会被合并，这是已知的近似。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupIndex {
  keep: Vec<usize>,
  inverse: Vec<usize>,
}

impl DedupIndex {
  /// `precision` 为量化精度，如 1/16 表示按 16 像素量化
  pub fn from_rois(rois: ArrayView2<f32>, precision: f32) -> Self {
    let hashes: Vec<f64> = rois
      .outer_iter()
      .map(|row| {
        row
          .iter()
          .zip(HASH_WEIGHTS)
          .map(|(&v, weight)| (v * precision).round_ties_even() as f64 * weight)
          .sum::<f64>()
      })
      .collect();

    let mut order: Vec<usize> = (0..hashes.len()).collect();
    order.sort_by(|&a, &b| hashes[a].total_cmp(&hashes[b]).then(a.cmp(&b)));

    let mut keep: Vec<usize> = Vec::new();
    let mut inverse = vec![0; hashes.len()];
    let mut last = None;
    for i in order {
      if last != Some(hashes[i]) {
        keep.push(i);
        last = Some(hashes[i]);
      }
      inverse[i] = keep.len() - 1;
    }

    Self { keep, inverse }
  }

  pub fn keep(&self) -> &[usize] {
    &self.keep
  }

  pub fn inverse(&self) -> &[usize] {
    &self.inverse
  }

  pub fn num_unique(&self) -> usize {
    self.keep.len()
  }

  pub fn num_original(&self) -> usize {
    self.inverse.len()
  }

  /// 取出唯一行
  pub fn select<A: Clone>(&self, rows: ArrayView2<A>) -> Array2<A> {
    rows.select(Axis(0), &self.keep)
  }

  /// 把唯一行上的结果散射回原始行
  pub fn scatter<A: Clone>(&self, rows: ArrayView2<A>) -> Array2<A> {
    rows.select(Axis(0), &self.inverse)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn merges_identical_rows() {
    let rois = array![
      [0.0f32, 16.0, 16.0, 64.0, 64.0],
      [0.0, 0.0, 0.0, 32.0, 32.0],
      [0.0, 16.0, 16.0, 64.0, 64.0],
    ];
    let index = DedupIndex::from_rois(rois.view(), 1.0 / 16.0);

    assert_eq!(index.num_unique(), 2);
    assert_eq!(index.num_original(), 3);
    // 哈希升序：第二行在前
    assert_eq!(index.keep(), &[1, 0]);
    assert_eq!(index.inverse(), &[1, 0, 1]);
  }

  #[test]
  fn quantization_merges_nearby_rows() {
    let rois = array![[0.0f32, 16.0, 16.0, 64.0, 64.0], [0.0, 17.0, 15.0, 63.0, 65.0]];
    let index = DedupIndex::from_rois(rois.view(), 1.0 / 16.0);
    assert_eq!(index.num_unique(), 1);
    assert_eq!(index.keep(), &[0]);
  }

  #[test]
  fn level_column_separates_rows() {
    let rois = array![[0.0f32, 16.0, 16.0, 64.0, 64.0], [1.0, 16.0, 16.0, 64.0, 64.0]];
    let index = DedupIndex::from_rois(rois.view(), 1.0);
    assert_eq!(index.num_unique(), 2);
  }

  #[test]
  fn scatter_restores_original_row_count() {
    let rois = array![
      [0.0f32, 1.0, 1.0, 5.0, 5.0],
      [0.0, 1.0, 1.0, 5.0, 5.0],
      [0.0, 2.0, 2.0, 9.0, 9.0],
      [0.0, 1.0, 1.0, 5.0, 5.0],
    ];
    let index = DedupIndex::from_rois(rois.view(), 1.0);
    let unique = index.select(rois.view());
    assert_eq!(unique.nrows(), 2);

    let scores = array![[0.1f32, 0.9], [0.6, 0.4]];
    let restored = index.scatter(scores.view());
    assert_eq!(restored.nrows(), 4);
    assert_eq!(restored.row(0), restored.row(1));
    assert_eq!(restored.row(0), restored.row(3));
    assert_eq!(restored.row(2), scores.row(1));
  }

  #[test]
  fn empty_input() {
    let rois = Array2::<f32>::zeros((0, 5));
    let index = DedupIndex::from_rois(rois.view(), 0.0625);
    assert_eq!(index.num_unique(), 0);
    assert_eq!(index.select(rois.view()).dim(), (0, 5));
  }
}
