// 该文件是 Xiling （西岭） 项目的一部分。
// src/detector.rs - 单张图像检测
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

use image::RgbImage;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use thiserror::Error;
use tracing::debug;

use crate::{
  boxes::{clip_boxes, decode_boxes, rescale_boxes, tile_boxes},
  config::TestConfig,
  dedup::DedupIndex,
  model::{Scorer, ScorerOutput},
  pyramid::{ImagePyramid, rois_blob},
};

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("候选框网络只支持单尺度, 实际有 {0} 个尺度")]
  MultiScaleProposalNetwork(usize),
  #[error("未启用候选框网络时必须提供候选框")]
  MissingProposals,
  #[error("候选框矩阵应为 N x {expected}, 实际为 {actual:?}")]
  BadProposals { expected: usize, actual: (usize, usize) },
  #[error("网络输出缺少候选框")]
  MissingRois,
  #[error("合并目标分数需要候选框网络输出")]
  MissingObjectness,
  #[error("网络输出形状不匹配: {0}")]
  ShapeMismatch(String),
  #[error("打分网络错误: {0}")]
  ScorerError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 一张图像的原始检测结果
///
/// `scores` 为 N x K，`boxes` 为 N x 4K，第 0 类为背景。
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDetections {
  pub scores: Array2<f32>,
  pub boxes: Array2<f32>,
}

impl ImageDetections {
  pub fn num_rois(&self) -> usize {
    self.scores.nrows()
  }

  pub fn num_classes(&self) -> usize {
    self.scores.ncols()
  }

  pub fn class_scores(&self, class: usize) -> ArrayView1<'_, f32> {
    self.scores.column(class)
  }

  pub fn class_boxes(&self, class: usize) -> ArrayView2<'_, f32> {
    self.boxes.slice(s![.., 4 * class..4 * class + 4])
  }
}

/// 检测器：构建金字塔、投影并去重候选框、调用打分网络、解码回归量
pub struct Detector {
  config: TestConfig,
}

impl Detector {
  pub fn new(config: TestConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &TestConfig {
    &self.config
  }

  pub fn detect<S>(
    &self,
    scorer: &S,
    image: &RgbImage,
    proposals: Option<ArrayView2<f32>>,
  ) -> Result<ImageDetections, DetectError>
  where
    S: Scorer,
    S::Error: std::error::Error + Send + Sync + 'static,
  {
    let config = &self.config;
    let pyramid = ImagePyramid::build(
      image,
      &config.scales,
      config.max_size,
      config.pixel_means,
    );
    let image_shape = pyramid.image_shape();

    let (output, boxes, dedup, objectness) = if config.has_rpn {
      if pyramid.num_levels() != 1 {
        return Err(DetectError::MultiScaleProposalNetwork(pyramid.num_levels()));
      }
      debug!("候选框网络模式, im_info = {:?}", pyramid.im_info());

      let mut output = score(scorer, &pyramid, None)?;
      let rois = output.rois.take().ok_or(DetectError::MissingRois)?;
      if rois.ncols() != 5 {
        return Err(DetectError::ShapeMismatch(format!(
          "候选框应有 5 列, 实际为 {}",
          rois.ncols()
        )));
      }

      let levels = vec![0; rois.nrows()];
      let boxes = rescale_boxes(rois.slice(s![.., 1..5]).to_owned(), &levels, pyramid.scales());
      let objectness = rois.column(0).to_owned();
      (output, boxes, None, Some(objectness))
    } else {
      let proposals = proposals.ok_or(DetectError::MissingProposals)?;
      if proposals.ncols() != 4 {
        return Err(DetectError::BadProposals {
          expected: 4,
          actual: proposals.dim(),
        });
      }

      let rois = rois_blob(proposals, pyramid.scales());
      let (rois, boxes, dedup) = if config.dedup_boxes > 0.0 {
        let index = DedupIndex::from_rois(rois.view(), config.dedup_boxes);
        debug!(
          "候选框去重: {} -> {}",
          index.num_original(),
          index.num_unique()
        );
        (index.select(rois.view()), index.select(proposals), Some(index))
      } else {
        (rois, proposals.to_owned(), None)
      };

      let output = score(scorer, &pyramid, Some(rois.view()))?;
      (output, boxes, dedup, None)
    };

    check_output(&output, boxes.nrows())?;

    let scores = if config.svm {
      // 按线性 SVM 训练的原始分数
      output.cls_score
    } else {
      output.cls_prob
    };

    let pred_boxes = if config.bbox_reg {
      clip_boxes(decode_boxes(boxes.view(), output.bbox_pred.view()), image_shape)
    } else {
      tile_boxes(boxes.view(), scores.ncols())
    };

    let (mut scores, pred_boxes) = match &dedup {
      Some(index) => (index.scatter(scores.view()), index.scatter(pred_boxes.view())),
      None => (scores, pred_boxes),
    };

    if config.include_rpn_score {
      let objectness: Array1<f32> = objectness.ok_or(DetectError::MissingObjectness)?;
      for (mut row, &weight) in scores.outer_iter_mut().zip(objectness.iter()) {
        row.mapv_inplace(|v| v * weight);
      }
    }

    debug!(
      "检测完成: {} 个候选框, {} 个类别",
      scores.nrows(),
      scores.ncols()
    );

    Ok(ImageDetections {
      scores,
      boxes: pred_boxes,
    })
  }
}

fn score<S>(
  scorer: &S,
  pyramid: &ImagePyramid,
  rois: Option<ArrayView2<f32>>,
) -> Result<ScorerOutput, DetectError>
where
  S: Scorer,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  scorer
    .score(pyramid, rois)
    .map_err(|e| DetectError::ScorerError(Box::new(e)))
}

fn check_output(output: &ScorerOutput, rows: usize) -> Result<(), DetectError> {
  let classes = output.num_classes();
  if output.cls_score.nrows() != rows
    || output.cls_prob.dim() != (rows, classes)
    || output.bbox_pred.dim() != (rows, 4 * classes)
  {
    return Err(DetectError::ShapeMismatch(format!(
      "{} 个候选框对应 cls_score {:?}, cls_prob {:?}, bbox_pred {:?}",
      rows,
      output.cls_score.dim(),
      output.cls_prob.dim(),
      output.bbox_pred.dim()
    )));
  }
  Ok(())
}
