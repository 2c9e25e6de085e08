// 该文件是 Xiling （西岭） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use xiling::{
  FromUrl,
  config::TestConfig,
  dataset::{Dataset, ManifestDataset},
  model::ScorerWrapper,
  record::output_dir,
  task::{EvalTask, Task},
};

fn model_name_from_url(url: &Url) -> String {
  url
    .path_segments()
    .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
    .map(str::to_string)
    .unwrap_or_else(|| url.scheme().to_string())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("数据集: {}", args.dataset);
  info!("打分网络: {}", args.model);

  let mut config = match &args.config {
    Some(path) => TestConfig::from_file(path)?,
    None => TestConfig::default(),
  };
  if let Some(thresh) = args.thresh {
    config.score_thresh = thresh;
  }
  if let Some(max_per_image) = args.max_per_image {
    config.max_per_image = max_per_image;
  }
  config.validate()?;
  info!("配置: {:?}", config);

  let dataset = ManifestDataset::from_url(&args.dataset)?;
  let scorer = ScorerWrapper::from_url(&args.model)?;
  let model_name = args
    .model_name
    .clone()
    .unwrap_or_else(|| model_name_from_url(&args.model));

  let output_dir = output_dir(&args.output_root, dataset.name(), &model_name);
  info!("结果目录: {}", output_dir.display());

  let now = std::time::Instant::now();
  let all_boxes = EvalTask::new(config, output_dir)
    .with_model_name(model_name)
    .with_force(args.force)
    .run_task(&dataset, &scorer)?;
  info!(
    "处理完成: {} 张图像, {} 个检测, 耗时 {:.2?}",
    all_boxes.num_images(),
    all_boxes.total(),
    now.elapsed()
  );

  Ok(())
}
