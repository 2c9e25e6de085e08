// 该文件是 Xiling （西岭） 项目的一部分。
// src/model/replay.rs - 回放已记录的网络输出
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

use std::{
  fs::File,
  io::{BufReader, BufWriter},
  path::{Path, PathBuf},
  sync::atomic::{AtomicUsize, Ordering},
};

use ndarray::ArrayView2;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Scorer, ScorerOutput},
  pyramid::ImagePyramid,
};

#[derive(Error, Debug)]
pub enum ReplayScorerError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("记录目录不存在: {0}")]
  MissingDirectory(PathBuf),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("记录 {index} 形状不匹配: {reason}")]
  ShapeMismatch { index: usize, reason: String },
}

/// 按调用顺序回放 `<目录>/<序号>.json` 中记录的网络输出
///
/// 用于在不重新运行网络的情况下调整后处理参数。
pub struct ReplayScorer {
  directory: PathBuf,
  counter: AtomicUsize,
}

impl FromUrlWithScheme for ReplayScorer {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayScorer {
  type Error = ReplayScorerError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ReplayScorerError::SchemeMismatch);
    }
    Self::open(url.path())
  }
}

impl ReplayScorer {
  pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, ReplayScorerError> {
    let directory = directory.as_ref().to_path_buf();
    if !directory.is_dir() {
      return Err(ReplayScorerError::MissingDirectory(directory));
    }
    info!("回放网络输出目录: {}", directory.display());
    Ok(Self {
      directory,
      counter: AtomicUsize::new(0),
    })
  }

  pub fn record_path(directory: &Path, index: usize) -> PathBuf {
    directory.join(format!("{:06}.json", index))
  }

  /// 写入一条记录，供之后回放
  pub fn write_record(
    directory: &Path,
    index: usize,
    output: &ScorerOutput,
  ) -> Result<(), ReplayScorerError> {
    let writer = BufWriter::new(File::create(Self::record_path(directory, index))?);
    serde_json::to_writer(writer, output)?;
    Ok(())
  }

  fn next_index(&self) -> usize {
    self.counter.fetch_add(1, Ordering::Relaxed)
  }
}

fn check_shape(
  index: usize,
  output: &ScorerOutput,
  rois: Option<ArrayView2<f32>>,
) -> Result<(), ReplayScorerError> {
  let mismatch = |reason: String| ReplayScorerError::ShapeMismatch { index, reason };

  let rows = output.num_rois();
  if output.cls_prob.dim() != output.cls_score.dim() {
    return Err(mismatch(format!(
      "cls_prob {:?} 与 cls_score {:?} 不一致",
      output.cls_prob.dim(),
      output.cls_score.dim()
    )));
  }
  if output.bbox_pred.dim() != (rows, 4 * output.num_classes()) {
    return Err(mismatch(format!(
      "bbox_pred 应为 {:?}, 实际为 {:?}",
      (rows, 4 * output.num_classes()),
      output.bbox_pred.dim()
    )));
  }
  match (rois, &output.rois) {
    (Some(rois), _) if rois.nrows() != rows => Err(mismatch(format!(
      "输入 {} 个候选框, 记录中有 {} 行",
      rois.nrows(),
      rows
    ))),
    (None, None) => Err(mismatch("候选框网络模式下记录缺少 rois".to_string())),
    (None, Some(generated)) if generated.nrows() != rows => Err(mismatch(format!(
      "生成 {} 个候选框, 记录中有 {} 行",
      generated.nrows(),
      rows
    ))),
    _ => Ok(()),
  }
}

impl Scorer for ReplayScorer {
  type Error = ReplayScorerError;

  fn score(
    &self,
    pyramid: &ImagePyramid,
    rois: Option<ArrayView2<f32>>,
  ) -> Result<ScorerOutput, Self::Error> {
    let index = self.next_index();
    let path = Self::record_path(&self.directory, index);
    debug!(
      "回放记录 {}: 金字塔 {} 层, 候选框 {:?}",
      path.display(),
      pyramid.num_levels(),
      rois.map(|r| r.nrows())
    );

    let reader = BufReader::new(File::open(&path)?);
    let output: ScorerOutput = serde_json::from_reader(reader)?;
    check_shape(index, &output, rois)?;
    Ok(output)
  }
}
