// 该文件是 Xiling （西岭） 项目的一部分。
// src/task.rs - 数据集批量检测任务
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
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use anyhow::{Context, anyhow, bail};
use tracing::{info, warn};

use crate::{
  config::TestConfig,
  dataset::Dataset,
  detector::Detector,
  input::read_image,
  model::Scorer,
  record::{AllBoxes, DETECTIONS_FILE, DetectionRecord},
  suppress::suppress_image,
};

pub trait Task<D, S>: Sized {
  type Error;
  fn run_task(self, dataset: &D, scorer: &S) -> Result<AllBoxes, Self::Error>;
}

/// 在整个数据集上检测并评估
///
/// 结果文件已存在且未要求强制重算时，直接加载结果文件再评估。
#[derive(Debug, Clone)]
pub struct EvalTask {
  config: TestConfig,
  output_dir: PathBuf,
  model_name: String,
  force: bool,
}

impl EvalTask {
  pub fn new(config: TestConfig, output_dir: PathBuf) -> Self {
    Self {
      config,
      output_dir,
      model_name: String::from("model"),
      force: false,
    }
  }

  pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
    self.model_name = model_name.into();
    self
  }

  pub fn with_force(mut self, force: bool) -> Self {
    self.force = force;
    self
  }

  pub fn output_dir(&self) -> &Path {
    &self.output_dir
  }

  pub fn detections_path(&self) -> PathBuf {
    self.output_dir.join(DETECTIONS_FILE)
  }

  fn detect_all<D, S>(&self, dataset: &D, scorer: &S) -> anyhow::Result<AllBoxes>
  where
    D: Dataset,
    S: Scorer,
    S::Error: std::error::Error + Send + Sync + 'static,
  {
    let detector = Detector::new(self.config.clone());
    let num_images = dataset.num_images();
    let num_classes = dataset.num_classes();
    let mut all_boxes = AllBoxes::new(num_classes, num_images);
    let mut detect_time = Duration::ZERO;

    for i in 0..num_images {
      let proposals = if self.config.has_rpn {
        None
      } else {
        let proposals = dataset
          .proposals_at(i)
          .ok_or_else(|| anyhow!("第 {} 张图像缺少候选框", i))?;
        Some(proposals.without_ground_truth())
      };

      let path = dataset.image_path_at(i);
      let image = read_image(&path).with_context(|| format!("无法读取图像: {}", path.display()))?;

      let now = Instant::now();
      let detections = detector
        .detect(scorer, &image, proposals.as_ref().map(|p| p.view()))
        .with_context(|| format!("第 {} 张图像检测失败: {}", i, path.display()))?;
      detect_time += now.elapsed();

      if detections.num_classes() != num_classes {
        bail!(
          "网络输出 {} 个类别, 数据集有 {} 个类别",
          detections.num_classes(),
          num_classes
        );
      }

      let suppressed = suppress_image(&detections, &self.config);
      let candidates = suppressed.candidates;
      let removed = suppressed.removed;
      all_boxes.set_image(i, suppressed.per_class)?;

      info!(
        "im_detect: {}/{} {} 个候选 {} 个保留 {} 个移除 {:.3?}",
        i + 1,
        num_images,
        candidates,
        all_boxes.image_count(i),
        removed,
        detect_time / (i + 1) as u32
      );
    }

    Ok(all_boxes)
  }
}

impl<D, S> Task<D, S> for EvalTask
where
  D: Dataset,
  D::Error: std::error::Error + Send + Sync + 'static,
  S: Scorer,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, dataset: &D, scorer: &S) -> Result<AllBoxes, Self::Error> {
    info!("开始任务: 数据集 {}, 模型 {}", dataset.name(), self.model_name);
    let det_file = self.detections_path();

    if self.force && det_file.exists() {
      warn!("强制重新检测, 删除 {}", det_file.display());
      std::fs::remove_file(&det_file)?;
    }

    let all_boxes = if det_file.exists() {
      info!("使用已有检测结果 {}", det_file.display());
      let record = DetectionRecord::load(&det_file)
        .with_context(|| format!("无法加载检测结果: {}", det_file.display()))?;
      let all_boxes = record.all_boxes;
      if all_boxes.num_classes() != dataset.num_classes()
        || all_boxes.num_images() != dataset.num_images()
      {
        bail!(
          "检测结果为 {} 类 x {} 张, 数据集为 {} 类 x {} 张, 请使用 --force 重新检测",
          all_boxes.num_classes(),
          all_boxes.num_images(),
          dataset.num_classes(),
          dataset.num_images()
        );
      }
      all_boxes
    } else {
      let all_boxes = self.detect_all(dataset, scorer)?;
      DetectionRecord::new(dataset.name(), &self.model_name, all_boxes.clone())
        .save(&det_file)?;
      all_boxes
    };

    info!("评估检测结果");
    dataset.evaluate_detections(&all_boxes, &self.output_dir)?;

    info!("任务完成，共 {} 个检测", all_boxes.total());
    Ok(all_boxes)
  }
}
