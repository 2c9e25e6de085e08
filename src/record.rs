// 该文件是 Xiling （西岭） 项目的一部分。
// src/record.rs - 检测表与结果文件
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
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::suppress::Detection;

/// 结果文件名
pub const DETECTIONS_FILE: &str = "detections.json";

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("结果文件不存在: {0}")]
  Missing(PathBuf),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("结果文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("检测表越界: 类别 {class}, 图像 {image}")]
  OutOfRange { class: usize, image: usize },
}

/// 按 [类别][图像] 排列的检测表，第 0 类为背景
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllBoxes {
  cells: Vec<Vec<Vec<Detection>>>,
}

impl AllBoxes {
  pub fn new(num_classes: usize, num_images: usize) -> Self {
    Self {
      cells: vec![vec![Vec::new(); num_images]; num_classes],
    }
  }

  pub fn num_classes(&self) -> usize {
    self.cells.len()
  }

  pub fn num_images(&self) -> usize {
    self.cells.first().map(Vec::len).unwrap_or(0)
  }

  pub fn get(&self, class: usize, image: usize) -> &[Detection] {
    self
      .cells
      .get(class)
      .and_then(|row| row.get(image))
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  /// 越界时忽略
  pub fn set(&mut self, class: usize, image: usize, dets: Vec<Detection>) {
    if let Some(cell) = self.cells.get_mut(class).and_then(|row| row.get_mut(image)) {
      *cell = dets;
    }
  }

  /// 写入一张图像的全部类别，第 0 类总是置空
  pub fn set_image(
    &mut self,
    image: usize,
    per_class: Vec<Vec<Detection>>,
  ) -> Result<(), RecordError> {
    if image >= self.num_images() || per_class.len() != self.num_classes() {
      return Err(RecordError::OutOfRange {
        class: per_class.len(),
        image,
      });
    }

    for (class, dets) in per_class.into_iter().enumerate() {
      self.cells[class][image] = if class == 0 { Vec::new() } else { dets };
    }
    Ok(())
  }

  /// 一张图像在所有类别上的检测数
  pub fn image_count(&self, image: usize) -> usize {
    (0..self.num_classes())
      .map(|class| self.get(class, image).len())
      .sum()
  }

  pub fn total(&self) -> usize {
    self.cells.iter().flatten().map(Vec::len).sum()
  }
}

/// 持久化的检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
  pub dataset: String,
  pub model: String,
  pub created_at: DateTime<Utc>,
  pub all_boxes: AllBoxes,
}

impl DetectionRecord {
  pub fn new(dataset: &str, model: &str, all_boxes: AllBoxes) -> Self {
    Self {
      dataset: dataset.to_string(),
      model: model.to_string(),
      created_at: Utc::now(),
      all_boxes,
    }
  }

  pub fn save(&self, path: &Path) -> Result<(), RecordError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, self)?;
    info!("检测结果已写入 {}", path.display());
    Ok(())
  }

  pub fn load(path: &Path) -> Result<Self, RecordError> {
    if !path.exists() {
      return Err(RecordError::Missing(path.to_path_buf()));
    }
    let reader = BufReader::new(File::open(path)?);
    let record = serde_json::from_reader(reader)?;
    info!("已加载检测结果 {}", path.display());
    Ok(record)
  }
}

/// 结果目录：`<root>/<数据集>/<模型>`
pub fn output_dir(root: &Path, dataset: &str, model: &str) -> PathBuf {
  root.join(dataset).join(model)
}
