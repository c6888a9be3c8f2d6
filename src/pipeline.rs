// 该文件是 Shitu （识途） 项目的一部分。
// src/pipeline.rs - 自适应推理流水线
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

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::annotate::{Annotator, FALLBACK_COLOR, PRIMARY_COLOR, encode_png};
use crate::detector::{Detector, DetectorError, InferParams};
use crate::geometry::{BoundingBox, NormalizedBox};
use crate::label;

/// 默认置信度阈值
pub const DEFAULT_CONF: f32 = 0.50;
/// 默认推理输入尺寸
pub const DEFAULT_IMGSZ: u32 = 640;
/// 默认 NMS IOU 阈值
pub const DEFAULT_IOU: f32 = 0.30;

// 回退通道参数: 必须严格比默认值更宽松（置信度更低、分辨率更高）
const FALLBACK_CONF: f32 = 0.01;
const FALLBACK_MIN_IMGSZ: u32 = 1280;
const FALLBACK_IOU: f32 = 0.50;

// 小图调整: 短边低于阈值时，主通道预先放宽默认参数。
// 与回退逻辑相互独立、可叠加，且只影响未被调用方固定的值。
const SMALL_IMAGE_SIDE: u32 = 256;
const SMALL_IMAGE_CONF: f32 = 0.25;
const SMALL_IMAGE_IMGSZ: u32 = 960;

/// 调用方可选的参数覆盖。
/// 显式给出置信度会关闭回退通道——空结果被视为最终答案。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InferenceRequest {
  pub confidence: Option<f32>,
  pub imgsz: Option<u32>,
}

/// 已夹取并通过类别映射的检测
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub class_name: String,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

/// 带归一化坐标的检测投影
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
  pub label: String,
  pub score: f32,
  /// 左上角与宽高（像素）
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
  pub nbox: NormalizedBox,
}

/// 面向前端的简化投影
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleObject {
  pub label: String,
  pub confidence: f32,
  pub bbox: [f32; 4],
}

/// 一次 `process` 调用的完整结果，随请求生灭，不做持久化
#[derive(Debug, Clone)]
pub struct InferenceOutcome {
  pub image_width: u32,
  pub image_height: u32,
  /// 几何校验后的存活检测，保持适配器输出顺序
  pub detections: Vec<Detection>,
  pub predictions: Vec<Prediction>,
  pub objects_simple: Vec<SimpleObject>,
  /// 存活集合的平均置信度，空集合时为 0.0
  pub avg_confidence: f32,
  pub used_confidence: f32,
  pub used_imgsz: u32,
  pub used_iou: f32,
  pub fallback_triggered: bool,
  /// 由存活集合（而非原始集合）绘制的标注图 PNG
  pub annotated_png: Vec<u8>,
}

impl InferenceOutcome {
  pub fn total(&self) -> usize {
    self.detections.len()
  }

  /// 置信度严格最高的存活检测；并列时返回先出现者，空集合返回 None
  pub fn best(&self) -> Option<&Detection> {
    let mut best: Option<&Detection> = None;
    for detection in &self.detections {
      if best.map(|b| detection.confidence > b.confidence).unwrap_or(true) {
        best = Some(detection);
      }
    }
    best
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("无法解码输入图像: {0}")]
  InvalidImage(image::ImageError),
  #[error(transparent)]
  Detector(#[from] DetectorError),
  #[error("标注图编码失败: {0}")]
  Encode(image::ImageError),
}

/// 自适应推理流水线: 主通道推理，必要时回退重试，
/// 之后做几何过滤、投影与标注。
pub struct Pipeline<'a, D: Detector> {
  detector: &'a D,
  annotator: Annotator,
}

impl<'a, D: Detector> Pipeline<'a, D> {
  pub fn new(detector: &'a D) -> Self {
    Self {
      detector,
      annotator: Annotator::new(),
    }
  }

  pub fn with_annotator(detector: &'a D, annotator: Annotator) -> Self {
    Self { detector, annotator }
  }

  /// 唯一入口: 解码图像字节，跑一到两次推理，返回过滤后的结果与标注图
  pub fn process(
    &self,
    image_bytes: &[u8],
    request: &InferenceRequest,
  ) -> Result<InferenceOutcome, PipelineError> {
    // 统一转为 3 通道，避免奇异色彩模式进入后续处理
    let image = image::load_from_memory(image_bytes)
      .map_err(PipelineError::InvalidImage)?
      .to_rgb8();
    let (width, height) = image.dimensions();

    let params = primary_params(request, width, height);
    debug!(
      "主通道参数: conf={} imgsz={} iou={}",
      params.confidence, params.imgsz, params.iou
    );

    // 主通道错误直接上浮，不做遮掩
    let mut raw = self.detector.infer(&image, &params)?;
    let mut used = params;
    let mut fallback_triggered = false;

    // 回退通道: 仅当主通道零检出且调用方未固定置信度时进入；
    // 回退本身的失败被吞掉，保留主通道（可能为空）的结果
    if raw.is_empty() && request.confidence.is_none() {
      let relaxed = InferParams {
        confidence: FALLBACK_CONF,
        imgsz: params.imgsz.max(FALLBACK_MIN_IMGSZ),
        iou: FALLBACK_IOU,
      };
      info!(
        "主通道无检出，使用宽松参数重试: conf={} imgsz={} iou={}",
        relaxed.confidence, relaxed.imgsz, relaxed.iou
      );
      match self.detector.infer(&image, &relaxed) {
        Ok(relaxed_raw) => {
          raw = relaxed_raw;
          used = relaxed;
          fallback_triggered = true;
        }
        Err(e) => warn!("回退通道失败，保留主通道结果: {}", e),
      }
    }

    let (width_f, height_f) = (width as f32, height as f32);

    // 夹取坐标并映射类别名称，再做几何过滤，存活者保持原顺序
    let detections: Vec<Detection> = raw
      .iter()
      .map(|r| Detection {
        class_id: r.class_id,
        class_name: label::class_name(r.class_id).to_string(),
        confidence: r.confidence,
        bbox: r.bbox.clamp_to(width_f, height_f),
      })
      .filter(|d| d.bbox.is_valid(width_f, height_f))
      .collect();
    debug!("原始检测 {} 个，过滤后剩余 {} 个", raw.len(), detections.len());

    let predictions: Vec<Prediction> = detections
      .iter()
      .map(|d| Prediction {
        label: d.class_name.clone(),
        score: d.confidence,
        x: d.bbox.x1,
        y: d.bbox.y1,
        w: d.bbox.width(),
        h: d.bbox.height(),
        nbox: NormalizedBox::from_box(&d.bbox, width_f, height_f),
      })
      .collect();

    let objects_simple: Vec<SimpleObject> = detections
      .iter()
      .map(|d| SimpleObject {
        label: d.class_name.clone(),
        confidence: d.confidence,
        bbox: [d.bbox.x1, d.bbox.y1, d.bbox.x2, d.bbox.y2],
      })
      .collect();

    let avg_confidence = average_confidence(&detections);

    // 标注只消费过滤后的集合；回退结果换用醒目颜色提示人工复核
    let color = if fallback_triggered { FALLBACK_COLOR } else { PRIMARY_COLOR };
    let annotated = self.annotator.annotate(&image, &detections, color);
    let annotated_png = encode_png(&annotated).map_err(PipelineError::Encode)?;

    Ok(InferenceOutcome {
      image_width: width,
      image_height: height,
      detections,
      predictions,
      objects_simple,
      avg_confidence,
      used_confidence: used.confidence,
      used_imgsz: used.imgsz,
      used_iou: used.iou,
      fallback_triggered,
      annotated_png,
    })
  }
}

/// 主通道参数: 默认值经小图调整后，再被调用方的显式覆盖取代
fn primary_params(request: &InferenceRequest, width: u32, height: u32) -> InferParams {
  let mut confidence = DEFAULT_CONF;
  let mut imgsz = DEFAULT_IMGSZ;
  if width.min(height) < SMALL_IMAGE_SIDE {
    confidence = confidence.min(SMALL_IMAGE_CONF);
    imgsz = imgsz.max(SMALL_IMAGE_IMGSZ);
  }

  InferParams {
    confidence: request.confidence.unwrap_or(confidence),
    imgsz: request.imgsz.unwrap_or(imgsz),
    iou: DEFAULT_IOU,
  }
}

/// 平均置信度，空集合时为 0.0，不产生 NaN
pub fn average_confidence(detections: &[Detection]) -> f32 {
  if detections.is_empty() {
    return 0.0;
  }
  detections.iter().map(|d| d.confidence).sum::<f32>() / detections.len() as f32
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::RawDetection;
  use image::{Rgb, RgbImage};
  use std::sync::Mutex;

  /// 脚本化检测器: 依次弹出预设响应，并记录每次调用的参数
  struct FakeDetector {
    responses: Mutex<Vec<Result<Vec<RawDetection>, DetectorError>>>,
    calls: Mutex<Vec<InferParams>>,
  }

  impl FakeDetector {
    fn new(responses: Vec<Result<Vec<RawDetection>, DetectorError>>) -> Self {
      Self {
        responses: Mutex::new(responses),
        calls: Mutex::new(Vec::new()),
      }
    }

    fn calls(&self) -> Vec<InferParams> {
      self.calls.lock().unwrap().clone()
    }
  }

  impl Detector for FakeDetector {
    fn infer(
      &self,
      _image: &RgbImage,
      params: &InferParams,
    ) -> Result<Vec<RawDetection>, DetectorError> {
      self.calls.lock().unwrap().push(*params);
      let mut responses = self.responses.lock().unwrap();
      if responses.is_empty() {
        Ok(Vec::new())
      } else {
        responses.remove(0)
      }
    }
  }

  fn raw(class_id: u32, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> RawDetection {
    RawDetection {
      class_id,
      confidence,
      bbox: BoundingBox::new(x1, y1, x2, y2),
    }
  }

  fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_png(&RgbImage::new(width, height)).unwrap()
  }

  #[test]
  fn fallback_triggers_and_relaxes_parameters() {
    let detector = FakeDetector::new(vec![
      Ok(Vec::new()),
      Ok(vec![raw(0, 0.12, 100.0, 100.0, 200.0, 200.0)]),
    ]);
    let pipeline = Pipeline::new(&detector);

    let outcome = pipeline
      .process(&png_bytes(500, 500), &InferenceRequest::default())
      .unwrap();

    assert!(outcome.fallback_triggered);
    assert_eq!(outcome.total(), 1);
    assert!(outcome.used_confidence < DEFAULT_CONF);
    assert!(outcome.used_imgsz >= DEFAULT_IMGSZ);

    let calls = detector.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].confidence < calls[0].confidence);
    assert!(calls[1].imgsz >= calls[0].imgsz);
    assert!(calls[1].iou > calls[0].iou);
  }

  #[test]
  fn explicit_confidence_disables_fallback() {
    let detector = FakeDetector::new(vec![Ok(Vec::new())]);
    let pipeline = Pipeline::new(&detector);
    let request = InferenceRequest {
      confidence: Some(0.8),
      imgsz: None,
    };

    let outcome = pipeline.process(&png_bytes(500, 500), &request).unwrap();

    assert!(!outcome.fallback_triggered);
    assert!(outcome.detections.is_empty());
    assert_eq!(outcome.avg_confidence, 0.0);
    assert_eq!(outcome.used_confidence, 0.8);
    assert_eq!(detector.calls().len(), 1);
  }

  #[test]
  fn fallback_error_is_swallowed_and_primary_kept() {
    let detector = FakeDetector::new(vec![
      Ok(Vec::new()),
      Err(DetectorError::Inference("超时".into())),
    ]);
    let pipeline = Pipeline::new(&detector);

    let outcome = pipeline
      .process(&png_bytes(500, 500), &InferenceRequest::default())
      .unwrap();

    assert!(!outcome.fallback_triggered);
    assert!(outcome.detections.is_empty());
    // 报告的参数是主通道的参数
    assert_eq!(outcome.used_confidence, DEFAULT_CONF);
    assert_eq!(outcome.used_imgsz, DEFAULT_IMGSZ);
  }

  #[test]
  fn primary_error_surfaces() {
    let detector = FakeDetector::new(vec![Err(DetectorError::ModelUnavailable("坏权重".into()))]);
    let pipeline = Pipeline::new(&detector);

    let result = pipeline.process(&png_bytes(500, 500), &InferenceRequest::default());
    assert!(matches!(
      result,
      Err(PipelineError::Detector(DetectorError::ModelUnavailable(_)))
    ));
  }

  #[test]
  fn invalid_bytes_are_rejected() {
    let detector = FakeDetector::new(vec![]);
    let pipeline = Pipeline::new(&detector);
    let result = pipeline.process(b"not an image", &InferenceRequest::default());
    assert!(matches!(result, Err(PipelineError::InvalidImage(_))));
  }

  #[test]
  fn best_picks_strictly_greatest_confidence() {
    let detector = FakeDetector::new(vec![Ok(vec![
      raw(0, 0.2, 10.0, 10.0, 60.0, 60.0),
      raw(1, 0.9, 100.0, 100.0, 160.0, 160.0),
      raw(2, 0.55, 200.0, 200.0, 260.0, 260.0),
    ])]);
    let pipeline = Pipeline::new(&detector);

    let outcome = pipeline
      .process(&png_bytes(500, 500), &InferenceRequest::default())
      .unwrap();

    assert_eq!(outcome.total(), 3);
    assert_eq!(outcome.best().unwrap().confidence, 0.9);
    assert!(outcome.avg_confidence >= 0.2 && outcome.avg_confidence <= 0.9);
  }

  #[test]
  fn best_tie_resolves_to_first_seen() {
    let detector = FakeDetector::new(vec![Ok(vec![
      raw(3, 0.9, 10.0, 10.0, 60.0, 60.0),
      raw(7, 0.9, 100.0, 100.0, 160.0, 160.0),
    ])]);
    let pipeline = Pipeline::new(&detector);

    let outcome = pipeline
      .process(&png_bytes(500, 500), &InferenceRequest::default())
      .unwrap();

    assert_eq!(outcome.best().unwrap().class_id, 3);
  }

  #[test]
  fn geometry_filter_drops_slivers_and_annotation_uses_survivors_only() {
    // 一个有效框和一个宽高比 10 的细条
    let detector = FakeDetector::new(vec![Ok(vec![
      raw(0, 0.9, 100.0, 100.0, 200.0, 200.0),
      raw(1, 0.95, 300.0, 300.0, 400.0, 310.0),
    ])]);
    let pipeline = Pipeline::new(&detector);

    let outcome = pipeline
      .process(&png_bytes(500, 500), &InferenceRequest::default())
      .unwrap();

    assert_eq!(outcome.total(), 1);
    assert_eq!(outcome.detections[0].class_id, 0);

    // 被剔除的细条不得出现在标注图上
    let annotated = image::load_from_memory(&outcome.annotated_png)
      .unwrap()
      .to_rgb8();
    assert_eq!(annotated.get_pixel(300, 300), &Rgb([0u8, 0, 0]));
    assert_eq!(annotated.get_pixel(100, 150), &Rgb(PRIMARY_COLOR));
  }

  #[test]
  fn small_boxes_are_dropped() {
    // 面积 100 平方像素，低于 500 下限
    let detector = FakeDetector::new(vec![
      Ok(vec![raw(0, 0.9, 50.0, 50.0, 60.0, 60.0)]),
      Ok(Vec::new()),
    ]);
    let pipeline = Pipeline::new(&detector);

    let outcome = pipeline
      .process(&png_bytes(500, 500), &InferenceRequest::default())
      .unwrap();

    assert_eq!(outcome.total(), 0);
    assert_eq!(outcome.avg_confidence, 0.0);
  }

  #[test]
  fn out_of_bounds_boxes_are_clamped_not_dropped() {
    let detector = FakeDetector::new(vec![Ok(vec![raw(0, 0.9, -30.0, -20.0, 150.0, 180.0)])]);
    let pipeline = Pipeline::new(&detector);

    let outcome = pipeline
      .process(&png_bytes(500, 500), &InferenceRequest::default())
      .unwrap();

    assert_eq!(outcome.total(), 1);
    let bbox = outcome.detections[0].bbox;
    assert_eq!(bbox.x1, 0.0);
    assert_eq!(bbox.y1, 0.0);
    assert_eq!(bbox.x2, 150.0);
    assert_eq!(bbox.y2, 180.0);
  }

  #[test]
  fn process_is_idempotent_for_identical_input() {
    let response = vec![
      raw(0, 0.7, 50.0, 50.0, 150.0, 150.0),
      raw(4, 0.6, 200.0, 200.0, 300.0, 320.0),
    ];
    let detector = FakeDetector::new(vec![Ok(response.clone()), Ok(response)]);
    let pipeline = Pipeline::new(&detector);
    let bytes = png_bytes(500, 500);
    let request = InferenceRequest {
      confidence: Some(0.5),
      imgsz: Some(640),
    };

    let first = pipeline.process(&bytes, &request).unwrap();
    let second = pipeline.process(&bytes, &request).unwrap();

    assert_eq!(first.detections, second.detections);
    assert_eq!(first.predictions, second.predictions);
    assert_eq!(first.annotated_png, second.annotated_png);
  }

  #[test]
  fn small_images_pre_relax_default_parameters() {
    let detector = FakeDetector::new(vec![Ok(vec![raw(0, 0.3, 10.0, 10.0, 60.0, 60.0)])]);
    let pipeline = Pipeline::new(&detector);

    pipeline
      .process(&png_bytes(120, 120), &InferenceRequest::default())
      .unwrap();

    let calls = detector.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].confidence < DEFAULT_CONF);
    assert!(calls[0].imgsz > DEFAULT_IMGSZ);
  }

  #[test]
  fn explicit_overrides_win_over_small_image_adjustment() {
    let detector = FakeDetector::new(vec![Ok(Vec::new())]);
    let pipeline = Pipeline::new(&detector);
    let request = InferenceRequest {
      confidence: Some(0.6),
      imgsz: Some(320),
    };

    pipeline.process(&png_bytes(120, 120), &request).unwrap();

    let calls = detector.calls();
    assert_eq!(calls[0].confidence, 0.6);
    assert_eq!(calls[0].imgsz, 320);
  }

  #[test]
  fn normalized_boxes_are_fractions_of_image() {
    let detector = FakeDetector::new(vec![Ok(vec![raw(0, 0.9, 100.0, 100.0, 200.0, 200.0)])]);
    let pipeline = Pipeline::new(&detector);

    let outcome = pipeline
      .process(&png_bytes(400, 400), &InferenceRequest::default())
      .unwrap();

    let nbox = outcome.predictions[0].nbox;
    assert_eq!(nbox.x, 0.25);
    assert_eq!(nbox.y, 0.25);
    assert_eq!(nbox.w, 0.25);
    assert_eq!(nbox.h, 0.25);
  }
}
