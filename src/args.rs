// 该文件是 Xiling （西岭） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Xiling 检测评估参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 数据集清单，如 manifest:///data/rgz/test.json
  #[arg(long, value_name = "DATASET")]
  pub dataset: Url,

  /// 打分网络，如 replay:///data/outputs/vgg16
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 模型名称，用于结果目录，默认取模型路径的最后一段
  #[arg(long, value_name = "NAME")]
  pub model_name: Option<String>,

  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 结果根目录
  #[arg(long, default_value = "output", value_name = "DIR")]
  pub output_root: PathBuf,

  /// 忽略已有结果，重新检测
  #[arg(long)]
  pub force: bool,

  /// 每张图像最大检测数（0 表示不限制）
  #[arg(long, value_name = "COUNT")]
  pub max_per_image: Option<usize>,

  /// 类别分数阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub thresh: Option<f32>,
}
