// 该文件是 Shitu （识途） 项目的一部分。
// src/report.rs - 结果投影与记录输出
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

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Datelike, Utc};
use serde_json::{Value, json};
use thiserror::Error;

use crate::pipeline::InferenceOutcome;

/// 推理结果的 JSON 投影，字段与检测服务的响应保持一致。
/// 标注图以 PNG 字节另行传输，不嵌入 JSON。
pub fn outcome_json(outcome: &InferenceOutcome) -> Value {
  let detections: Vec<Value> = outcome
    .detections
    .iter()
    .map(|d| {
      json!({
        "cls_id": d.class_id,
        "cls_name": d.class_name,
        "conf": d.confidence,
        "bbox": [d.bbox.x1, d.bbox.y1, d.bbox.x2, d.bbox.y2],
      })
    })
    .collect();

  let predictions: Vec<Value> = outcome
    .predictions
    .iter()
    .map(|p| {
      json!({
        "label": p.label,
        "score": p.score,
        "box": {"x": p.x, "y": p.y, "w": p.w, "h": p.h},
        "nbox": {"x": p.nbox.x, "y": p.nbox.y, "w": p.nbox.w, "h": p.nbox.h},
      })
    })
    .collect();

  let objects_simple: Vec<Value> = outcome
    .objects_simple
    .iter()
    .map(|o| {
      json!({
        "label": o.label,
        "confidence": o.confidence,
        "bbox": o.bbox,
      })
    })
    .collect();

  json!({
    "success": true,
    "image_width": outcome.image_width,
    "image_height": outcome.image_height,
    "total": outcome.total(),
    "avg_conf": outcome.avg_confidence,
    "avg_conf_percent": avg_conf_percent(outcome),
    "detections": detections,
    "predictions": predictions,
    "objects_simple": objects_simple,
    "used_conf": outcome.used_confidence,
    "used_imgsz": outcome.used_imgsz,
    "used_iou": outcome.used_iou,
    "fallback_used": outcome.fallback_triggered,
  })
}

/// best/all 投影: 最优检测与全部存活检测的标签-置信度对
pub fn label_json(outcome: &InferenceOutcome) -> Value {
  let best = outcome
    .best()
    .map(|d| json!({"cls_name": d.class_name, "conf": d.confidence}));
  let all: Vec<Value> = outcome
    .detections
    .iter()
    .map(|d| json!({"cls_name": d.class_name, "conf": d.confidence}))
    .collect();

  json!({"best": best, "all": all})
}

/// 空集合时为 0，其余四舍五入到整数百分比
fn avg_conf_percent(outcome: &InferenceOutcome) -> i64 {
  if outcome.total() > 0 {
    (outcome.avg_confidence * 100.0).round() as i64
  } else {
    0
  }
}

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 序列化失败: {0}")]
  Json(#[from] serde_json::Error),
}

/// 按日期归档的记录输出: 每次推理保存标注图 PNG 与 JSON 附注
pub struct RecordWriter {
  directory: PathBuf,
  counter: Mutex<u16>,
}

impl RecordWriter {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      counter: Mutex::new(0),
    }
  }

  fn next_id(&self) -> u16 {
    let mut counter = self.counter.lock().unwrap();
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  fn record_base(&self) -> Result<PathBuf, RecordError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!("{}-{:04X}", now.format("%H-%M-%S"), self.next_id())))
  }

  /// 保存一次推理的标注图与记录，返回不带扩展名的基础路径
  pub fn save(&self, outcome: &InferenceOutcome) -> Result<PathBuf, RecordError> {
    let base = self.record_base()?;
    std::fs::write(base.with_extension("png"), &outcome.annotated_png)?;
    let report = serde_json::to_string_pretty(&outcome_json(outcome))?;
    std::fs::write(base.with_extension("json"), report)?;
    Ok(base)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::{BoundingBox, NormalizedBox};
  use crate::pipeline::{Detection, Prediction, SimpleObject};

  fn outcome_with(detections: Vec<Detection>) -> InferenceOutcome {
    let predictions = detections
      .iter()
      .map(|d| Prediction {
        label: d.class_name.clone(),
        score: d.confidence,
        x: d.bbox.x1,
        y: d.bbox.y1,
        w: d.bbox.width(),
        h: d.bbox.height(),
        nbox: NormalizedBox::from_box(&d.bbox, 500.0, 500.0),
      })
      .collect();
    let objects_simple = detections
      .iter()
      .map(|d| SimpleObject {
        label: d.class_name.clone(),
        confidence: d.confidence,
        bbox: [d.bbox.x1, d.bbox.y1, d.bbox.x2, d.bbox.y2],
      })
      .collect();
    let avg_confidence = crate::pipeline::average_confidence(&detections);

    InferenceOutcome {
      image_width: 500,
      image_height: 500,
      detections,
      predictions,
      objects_simple,
      avg_confidence,
      used_confidence: 0.5,
      used_imgsz: 640,
      used_iou: 0.3,
      fallback_triggered: false,
      annotated_png: Vec::new(),
    }
  }

  fn detection(class_id: u32, confidence: f32) -> Detection {
    Detection {
      class_id,
      class_name: crate::label::class_name(class_id).to_string(),
      confidence,
      bbox: BoundingBox::new(10.0, 10.0, 110.0, 110.0),
    }
  }

  #[test]
  fn empty_outcome_reports_zero_percent_and_null_best() {
    let outcome = outcome_with(Vec::new());
    let report = outcome_json(&outcome);
    assert_eq!(report["total"], 0);
    assert_eq!(report["avg_conf"], 0.0);
    assert_eq!(report["avg_conf_percent"], 0);

    let labels = label_json(&outcome);
    assert!(labels["best"].is_null());
    assert_eq!(labels["all"].as_array().unwrap().len(), 0);
  }

  #[test]
  fn report_carries_used_parameters_and_fallback_flag() {
    let outcome = outcome_with(vec![detection(0, 0.8)]);
    let report = outcome_json(&outcome);
    assert_eq!(report["used_conf"], 0.5);
    assert_eq!(report["used_imgsz"], 640);
    assert_eq!(report["fallback_used"], false);
    assert_eq!(report["avg_conf_percent"], 80);
  }

  #[test]
  fn label_projection_picks_best() {
    let outcome = outcome_with(vec![detection(0, 0.4), detection(9, 0.7)]);
    let labels = label_json(&outcome);
    assert_eq!(labels["best"]["cls_name"], "Den_Giao_Thong");
    assert_eq!(labels["all"].as_array().unwrap().len(), 2);
  }
}
