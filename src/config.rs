// 该文件是 Xiling （西岭） 项目的一部分。
// src/config.rs - 推理与后处理配置
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

use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::suppress::RemoveOption;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 测试阶段配置，未给出的字段取默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
  /// 金字塔每层短边的目标尺寸
  pub scales: Vec<u32>,
  /// 缩放后最长边上限
  pub max_size: u32,
  /// 各通道像素均值
  pub pixel_means: [f32; 3],
  /// 由网络自身生成候选框
  pub has_rpn: bool,
  /// 应用边界框回归
  pub bbox_reg: bool,
  /// 使用 softmax 之前的原始分数
  pub svm: bool,
  /// NMS 的 IoU 阈值
  pub nms: f32,
  /// 进入 NMS 前的检测分数阈值
  pub det_threshold: f32,
  /// 候选框去重的量化精度，0 表示关闭
  pub dedup_boxes: f32,
  /// 每个类别的初始分数阈值
  pub score_thresh: f32,
  /// 每张图像跨类别的最大检测数，0 表示不限制
  pub max_per_image: usize,
  /// 把候选框网络的目标分数乘到类别分数上
  pub include_rpn_score: bool,
  /// 嵌套框移除策略，默认关闭
  pub embedded_removal: Option<RemoveOption>,
}

impl Default for TestConfig {
  fn default() -> Self {
    Self {
      scales: vec![600],
      max_size: 1000,
      pixel_means: [122.7717, 115.9465, 102.9801],
      has_rpn: false,
      bbox_reg: true,
      svm: false,
      nms: 0.3,
      det_threshold: 0.0,
      dedup_boxes: 1.0 / 16.0,
      score_thresh: 0.05,
      max_per_image: 300,
      include_rpn_score: false,
      embedded_removal: None,
    }
  }
}

impl TestConfig {
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let reader = BufReader::new(File::open(path)?);
    let config: TestConfig = serde_json::from_reader(reader)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.scales.is_empty() {
      return Err(ConfigError::Invalid("scales 不能为空".to_string()));
    }
    if self.scales.contains(&0) || self.max_size == 0 {
      return Err(ConfigError::Invalid("尺寸必须为正数".to_string()));
    }
    if !(0.0..=1.0).contains(&self.nms) {
      return Err(ConfigError::Invalid(format!(
        "NMS 阈值必须在 [0, 1] 内, 实际为 {}",
        self.nms
      )));
    }
    if self.dedup_boxes < 0.0 || !self.dedup_boxes.is_finite() {
      return Err(ConfigError::Invalid(format!(
        "dedup_boxes 必须为非负数, 实际为 {}",
        self.dedup_boxes
      )));
    }
    if self.include_rpn_score && !self.has_rpn {
      return Err(ConfigError::Invalid(
        "include_rpn_score 需要启用 has_rpn".to_string(),
      ));
    }
    Ok(())
  }
}
