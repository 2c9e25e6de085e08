// 该文件是 Xiling （西岭） 项目的一部分。
// src/dataset/manifest.rs - 清单文件描述的数据集
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
  io::{BufReader, BufWriter, Write},
  path::{Path, PathBuf},
};

use ndarray::Array2;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  dataset::{Dataset, Proposals},
  record::AllBoxes,
};

#[derive(Error, Debug)]
pub enum ManifestDatasetError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("清单解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("清单无效: {0}")]
  Invalid(String),
}

#[derive(Debug, Deserialize)]
struct Manifest {
  name: String,
  classes: Vec<String>,
  images: Vec<ManifestImage>,
}

#[derive(Debug, Deserialize)]
struct ManifestImage {
  path: PathBuf,
  #[serde(default)]
  proposals: Vec<[f32; 4]>,
  #[serde(default)]
  gt_classes: Vec<u32>,
}

/// JSON 清单描述的数据集
///
/// 相对路径按清单文件所在目录解析。评估时为每个前景类别写出 `det_<类别>.txt`。
#[derive(Debug)]
pub struct ManifestDataset {
  name: String,
  classes: Vec<String>,
  images: Vec<PathBuf>,
  proposals: Vec<Proposals>,
}

impl FromUrlWithScheme for ManifestDataset {
  const SCHEME: &'static str = "manifest";
}

impl FromUrl for ManifestDataset {
  type Error = ManifestDatasetError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ManifestDatasetError::SchemeMismatch);
    }
    Self::open(url.path())
  }
}

impl ManifestDataset {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ManifestDatasetError> {
    let path = path.as_ref();
    info!("加载数据集清单: {}", path.display());
    let reader = BufReader::new(File::open(path)?);
    let manifest: Manifest = serde_json::from_reader(reader)?;
    let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Self::from_manifest(manifest, &root)
  }

  fn from_manifest(manifest: Manifest, root: &Path) -> Result<Self, ManifestDatasetError> {
    if manifest.classes.len() < 2 {
      return Err(ManifestDatasetError::Invalid(
        "至少需要背景类和一个前景类".to_string(),
      ));
    }

    let mut images = Vec::with_capacity(manifest.images.len());
    let mut proposals = Vec::with_capacity(manifest.images.len());
    for (index, image) in manifest.images.into_iter().enumerate() {
      if !image.gt_classes.is_empty() && image.gt_classes.len() != image.proposals.len() {
        return Err(ManifestDatasetError::Invalid(format!(
          "图像 {}: {} 个候选框对应 {} 个真值标记",
          index,
          image.proposals.len(),
          image.gt_classes.len()
        )));
      }

      images.push(root.join(&image.path));
      proposals.push(Proposals {
        boxes: Array2::from(image.proposals),
        gt_classes: image.gt_classes,
      });
    }

    info!(
      "数据集 {}: {} 张图像, {} 个类别",
      manifest.name,
      images.len(),
      manifest.classes.len()
    );

    Ok(Self {
      name: manifest.name,
      classes: manifest.classes,
      images,
      proposals,
    })
  }

  fn image_id(&self, index: usize) -> String {
    self.images[index]
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_else(|| index.to_string())
  }
}

impl Dataset for ManifestDataset {
  type Error = ManifestDatasetError;

  fn name(&self) -> &str {
    &self.name
  }

  fn classes(&self) -> &[String] {
    &self.classes
  }

  fn num_images(&self) -> usize {
    self.images.len()
  }

  fn image_path_at(&self, index: usize) -> PathBuf {
    self.images[index].clone()
  }

  fn proposals_at(&self, index: usize) -> Option<&Proposals> {
    self.proposals.get(index)
  }

  fn evaluate_detections(
    &self,
    all_boxes: &AllBoxes,
    output_dir: &Path,
  ) -> Result<(), Self::Error> {
    std::fs::create_dir_all(output_dir)?;

    for (class, class_name) in self.classes.iter().enumerate().skip(1) {
      let path = output_dir.join(format!("det_{}.txt", class_name));
      let mut writer = BufWriter::new(File::create(&path)?);
      for image in 0..self.num_images() {
        let image_id = self.image_id(image);
        for det in all_boxes.get(class, image) {
          writeln!(
            writer,
            "{} {:.3} {:.1} {:.1} {:.1} {:.1}",
            image_id, det.score, det.bbox[0], det.bbox[1], det.bbox[2], det.bbox[3]
          )?;
        }
      }
      writer.flush()?;
      info!("写出类别 {} 的检测结果: {}", class_name, path.display());
    }

    Ok(())
  }
}
