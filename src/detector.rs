// 该文件是 Shitu （识途） 项目的一部分。
// src/detector.rs - 检测器边界
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Shitu Contributors

use std::sync::OnceLock;

use image::RgbImage;
use thiserror::Error;

use crate::geometry::BoundingBox;

/// 单次推理的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferParams {
  /// 置信度阈值 (0.0 - 1.0)
  pub confidence: f32,
  /// 推理输入尺寸（像素）
  pub imgsz: u32,
  /// NMS IOU 阈值 (0.0 - 1.0)
  pub iou: f32,
}

/// 适配器输出的原始检测，坐标为原图绝对像素，尚未夹取
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  pub class_id: u32,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型不可用: {0}")]
  ModelUnavailable(String),
  #[error("推理失败: {0}")]
  Inference(String),
}

/// 不透明检测器边界。实现必须满足: 相同输入产生相同输出，
/// 权重加载完成后 infer 为只读操作。
pub trait Detector {
  fn infer(&self, image: &RgbImage, params: &InferParams) -> Result<Vec<RawDetection>, DetectorError>;
}

/// 惰性单次初始化的检测器持有者。
///
/// 并发首次访问由 `OnceLock` 串行化，保证权重在进程生命周期内最多加载一次；
/// 加载失败同样被缓存，之后的每次调用都返回 `ModelUnavailable`，不会按请求重试。
pub struct LazyDetector<D> {
  cell: OnceLock<Result<D, String>>,
  loader: Box<dyn Fn() -> Result<D, DetectorError> + Send + Sync>,
}

impl<D> LazyDetector<D> {
  pub fn new(loader: impl Fn() -> Result<D, DetectorError> + Send + Sync + 'static) -> Self {
    Self {
      cell: OnceLock::new(),
      loader: Box::new(loader),
    }
  }

  /// 取出检测器，必要时触发唯一一次加载
  pub fn get(&self) -> Result<&D, DetectorError> {
    match self
      .cell
      .get_or_init(|| (self.loader)().map_err(|e| e.to_string()))
    {
      Ok(detector) => Ok(detector),
      Err(message) => Err(DetectorError::ModelUnavailable(message.clone())),
    }
  }
}

impl<D: Detector> Detector for LazyDetector<D> {
  fn infer(&self, image: &RgbImage, params: &InferParams) -> Result<Vec<RawDetection>, DetectorError> {
    self.get()?.infer(image, params)
  }
}

#[cfg(feature = "model_yolo11")]
mod yolo11;
#[cfg(feature = "model_yolo11")]
pub use self::yolo11::Yolo11;
