// 该文件是 Shitu （识途） 项目的一部分。
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
// Copyright (C) 2026 Shitu Contributors

use std::path::PathBuf;

use clap::Parser;

/// Shitu 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub model: PathBuf,

  /// 输入图片路径
  /// 支持格式: *.jpg, *.jpeg, *.png, *.bmp, *.webp
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,

  /// 标注结果图输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)。
  /// 不指定时使用默认策略，零检出会触发宽松参数的回退重试；
  /// 显式指定则空结果视为最终答案，不再回退
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// 推理输入尺寸（像素）
  #[arg(long, value_name = "SIZE")]
  pub imgsz: Option<u32>,

  /// 记录目录，按日期归档保存标注图与 JSON 记录
  #[arg(long, value_name = "DIR")]
  pub record: Option<PathBuf>,
}
