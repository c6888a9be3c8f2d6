// 该文件是 Shitu （识途） 项目的一部分。
// src/detector/yolo11.rs - YOLO11 ONNX 检测后端
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

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use tracing::{debug, info};

use crate::detector::{Detector, DetectorError, InferParams, RawDetection};
use crate::geometry::BoundingBox;

/// YOLO11 目标检测器。
///
/// 模型输入为 `[1, 3, S, S]` 归一化 RGB 张量，输出为 `[1, 4+类别数, N]`
/// 的检测头（中心点 + 宽高 + 各类别分数，分数已是概率）。
pub struct Yolo11 {
  // run 需要独占访问会话，用互斥锁做内部可变性；
  // 流水线本身是单请求串行模型，锁无竞争
  session: Mutex<Session>,
}

impl Yolo11 {
  /// 加载 ONNX 模型文件。失败视为模型不可用，由调用方缓存，不按请求重试。
  pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
    info!("加载模型文件: {}", model_path.display());
    let session = Session::builder()
      .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
      .and_then(|builder| builder.commit_from_file(model_path))
      .map_err(|e| {
        DetectorError::ModelUnavailable(format!("无法加载模型 {}: {}", model_path.display(), e))
      })?;
    info!("模型加载完成");

    Ok(Self {
      session: Mutex::new(session),
    })
  }

  /// 预处理: 缩放到 S×S 并归一化为 NCHW 浮点张量。
  /// 返回张量与 (x, y) 方向上还原到原图的缩放系数。
  fn preprocess(image: &RgbImage, imgsz: u32) -> (Array4<f32>, f32, f32) {
    let resized = image::imageops::resize(
      image,
      imgsz,
      imgsz,
      image::imageops::FilterType::Triangle,
    );

    let side = imgsz as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
      for c in 0..3 {
        tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
      }
    }

    let scale_x = image.width() as f32 / imgsz as f32;
    let scale_y = image.height() as f32 / imgsz as f32;
    (tensor, scale_x, scale_y)
  }

  /// 解码检测头: 每列取最高类别分数，过阈值后换算回原图坐标
  fn decode(
    data: &[f32],
    channels: usize,
    columns: usize,
    params: &InferParams,
    scale_x: f32,
    scale_y: f32,
  ) -> Vec<RawDetection> {
    let num_classes = channels - 4;
    let mut candidates = Vec::new();

    for i in 0..columns {
      let at = |c: usize| data[c * columns + i];

      let mut best_score = 0.0f32;
      let mut best_class = 0usize;
      for c in 0..num_classes {
        let score = at(4 + c);
        if score > best_score {
          best_score = score;
          best_class = c;
        }
      }

      if best_score < params.confidence {
        continue;
      }

      let cx = at(0);
      let cy = at(1);
      let w = at(2);
      let h = at(3);

      candidates.push(RawDetection {
        class_id: best_class as u32,
        confidence: best_score,
        bbox: BoundingBox::new(
          (cx - w / 2.0) * scale_x,
          (cy - h / 2.0) * scale_y,
          (cx + w / 2.0) * scale_x,
          (cy + h / 2.0) * scale_y,
        ),
      });
    }

    nms(candidates, params.iou)
  }
}

impl Detector for Yolo11 {
  fn infer(&self, image: &RgbImage, params: &InferParams) -> Result<Vec<RawDetection>, DetectorError> {
    debug!(
      "执行推理: conf={} imgsz={} iou={}",
      params.confidence, params.imgsz, params.iou
    );

    let (tensor, scale_x, scale_y) = Self::preprocess(image, params.imgsz);
    let shape = tensor.shape().to_vec();
    let (data, _offset) = tensor.into_raw_vec_and_offset();
    let input = ort::value::Value::from_array((shape.as_slice(), data))
      .map_err(|e| DetectorError::Inference(format!("输入张量构造失败: {}", e)))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| DetectorError::Inference("推理会话锁中毒".to_string()))?;
    let outputs = session
      .run(ort::inputs!["images" => input])
      .map_err(|e| DetectorError::Inference(format!("模型执行失败: {}", e)))?;

    let (out_shape, out_data) = outputs[0]
      .try_extract_tensor::<f32>()
      .map_err(|e| DetectorError::Inference(format!("输出张量提取失败: {}", e)))?;

    // 期望输出形状 [1, 4+类别数, N]
    if out_shape.len() != 3 || out_shape[1] < 5 {
      return Err(DetectorError::Inference(format!(
        "意外的输出形状: {:?}",
        out_shape
      )));
    }
    let channels = out_shape[1] as usize;
    let columns = out_shape[2] as usize;

    let detections = Self::decode(out_data, channels, columns, params, scale_x, scale_y);
    debug!("检测到 {} 个候选框", detections.len());

    Ok(detections)
  }
}

/// 非极大值抑制: 按置信度降序，同类别且重叠超过阈值的候选被丢弃
fn nms(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept = Vec::new();
  while !candidates.is_empty() {
    let best = candidates.remove(0);
    candidates.retain(|other| {
      other.class_id != best.class_id || iou(&best.bbox, &other.bbox) < iou_threshold
    });
    kept.push(best);
  }

  kept
}

/// 计算两个检测框的 IoU
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let x1 = a.x1.max(b.x1);
  let y1 = a.y1.max(b.y1);
  let x2 = a.x2.min(b.x2);
  let y2 = a.y2.min(b.y2);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}
