// 该文件是 Shitu （识途） 项目的一部分。
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
// Copyright (C) 2026 Shitu Contributors

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use shitu::detector::{LazyDetector, Yolo11};
use shitu::pipeline::{InferenceRequest, Pipeline};
use shitu::report;

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入图片: {}", args.input.display());
  info!("输出路径: {}", args.output.display());
  info!("支持类别数: {}", shitu::label::num_classes());

  // 权重只加载一次，加载失败会被缓存为模型不可用
  let model_path = args.model.clone();
  let detector = LazyDetector::new(move || Yolo11::load(&model_path));
  let pipeline = Pipeline::new(&detector);

  let request = InferenceRequest {
    confidence: args.confidence,
    imgsz: args.imgsz,
  };
  let image_bytes = std::fs::read(&args.input)?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  let outcome = pipeline.process(&image_bytes, &request)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  info!(
    "检出 {} 个目标，平均置信度 {:.2}，回退: {}",
    outcome.total(),
    outcome.avg_confidence,
    outcome.fallback_triggered
  );
  for detection in &outcome.detections {
    info!(
      "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}, {:.0})",
      detection.class_name,
      detection.confidence * 100.0,
      detection.bbox.x1,
      detection.bbox.y1,
      detection.bbox.x2,
      detection.bbox.y2
    );
  }

  std::fs::write(&args.output, &outcome.annotated_png)?;
  info!("标注图已保存: {}", args.output.display());

  if let Some(directory) = &args.record {
    let writer = report::RecordWriter::new(directory);
    let base = writer.save(&outcome)?;
    info!("记录已保存: {}", base.display());
  }

  println!(
    "{}",
    serde_json::to_string_pretty(&report::outcome_json(&outcome))?
  );

  Ok(())
}
