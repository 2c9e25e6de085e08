// 该文件是 Xiling （西岭） 项目的一部分。
// src/model.rs - 打分网络
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

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{FromUrl, pyramid::ImagePyramid};

/// 打分网络
///
/// 给定图像金字塔和候选框矩阵（候选框网络模式下为 `None`），返回类别分数与回归量。
pub trait Scorer {
  type Error;

  fn score(
    &self,
    pyramid: &ImagePyramid,
    rois: Option<ArrayView2<f32>>,
  ) -> Result<ScorerOutput, Self::Error>;
}

impl<S: Scorer> Scorer for &S {
  type Error = S::Error;

  fn score(
    &self,
    pyramid: &ImagePyramid,
    rois: Option<ArrayView2<f32>>,
  ) -> Result<ScorerOutput, Self::Error> {
    (**self).score(pyramid, rois)
  }
}

/// 网络的一次前向输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerOutput {
  /// softmax 之前的分数，N x K
  pub cls_score: Array2<f32>,
  /// softmax 概率，N x K
  pub cls_prob: Array2<f32>,
  /// 回归量，N x 4K
  pub bbox_pred: Array2<f32>,
  /// 候选框网络生成的候选框，N x 5，第 0 列为目标分数
  #[serde(default)]
  pub rois: Option<Array2<f32>>,
}

impl ScorerOutput {
  pub fn num_rois(&self) -> usize {
    self.cls_score.nrows()
  }

  pub fn num_classes(&self) -> usize {
    self.cls_score.ncols()
  }
}

#[cfg(feature = "replay_scorer")]
mod replay;
#[cfg(feature = "replay_scorer")]
pub use self::replay::{ReplayScorer, ReplayScorerError};

#[derive(Error, Debug)]
pub enum ScorerError {
  #[cfg(feature = "replay_scorer")]
  #[error("回放打分器错误: {0}")]
  ReplayScorerError(#[from] ReplayScorerError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择打分器实现
pub enum ScorerWrapper {
  #[cfg(feature = "replay_scorer")]
  Replay(ReplayScorer),
}

impl FromUrl for ScorerWrapper {
  type Error = ScorerError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "replay_scorer")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ReplayScorer::SCHEME {
        return Ok(ScorerWrapper::Replay(ReplayScorer::from_url(url)?));
      }
    }
    Err(ScorerError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Scorer for ScorerWrapper {
  type Error = ScorerError;

  fn score(
    &self,
    pyramid: &ImagePyramid,
    rois: Option<ArrayView2<f32>>,
  ) -> Result<ScorerOutput, Self::Error> {
    match *self {
      #[cfg(feature = "replay_scorer")]
      ScorerWrapper::Replay(ref scorer) => scorer.score(pyramid, rois).map_err(ScorerError::from),
    }
  }
}
