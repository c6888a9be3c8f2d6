// 该文件是 Shitu （识途） 项目的一部分。
// src/annotate.rs - 检测结果标注
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

use std::io::Cursor;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::debug;

use crate::pipeline::Detection;

/// 主通道标注颜色（绿色）
pub const PRIMARY_COLOR: [u8; 3] = [0, 255, 0];
/// 回退通道标注颜色（橙色），提示结果为低置信度推测，需人工复核
pub const FALLBACK_COLOR: [u8; 3] = [255, 165, 0];

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TAG_PAD: i32 = 4;
// 无字体时的粗略估计
const EST_CHAR_WIDTH: f32 = 8.0;
const EST_TEXT_HEIGHT: i32 = 18;

// 常见系统字体位置，按顺序探测
const FONT_CANDIDATES: [&str; 4] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
];

/// 检测框与标签的绘制工具。
///
/// 字体是显式能力: 探测不到可用字体并不是错误，标注退化为
/// 仅绘制边框与标签底色，文本尺寸改用 8px/字符 × 18px 估计。
pub struct Annotator {
  font: Option<FontArc>,
  font_size: f32,
}

impl Default for Annotator {
  fn default() -> Self {
    Self::new()
  }
}

impl Annotator {
  pub fn new() -> Self {
    let font = FONT_CANDIDATES.iter().find_map(|path| {
      let data = std::fs::read(path).ok()?;
      FontArc::try_from_vec(data).ok()
    });
    if font.is_none() {
      debug!("未找到可用字体，标签文本将被省略");
    }

    Self {
      font,
      font_size: LABEL_FONT_SIZE,
    }
  }

  /// 使用调用方提供的字体数据
  pub fn with_font_bytes(data: Vec<u8>) -> Option<Self> {
    FontArc::try_from_vec(data).ok().map(|font| Self {
      font: Some(font),
      font_size: LABEL_FONT_SIZE,
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 标签文本尺寸: 有字体时按字形推进量累加，否则用粗略估计
  fn measure(&self, label: &str) -> (i32, i32) {
    match &self.font {
      Some(font) => {
        let scaled = font.as_scaled(PxScale::from(self.font_size));
        let width: f32 = label
          .chars()
          .map(|c| scaled.h_advance(scaled.glyph_id(c)))
          .sum();
        (width.ceil() as i32, scaled.height().ceil() as i32)
      }
      None => (
        (label.chars().count() as f32 * EST_CHAR_WIDTH) as i32,
        EST_TEXT_HEIGHT,
      ),
    }
  }

  /// 在输入图像的副本上绘制检测框与标签，原图保持不变。
  /// 调用方只应传入通过几何校验的检测。
  pub fn annotate(&self, image: &RgbImage, detections: &[Detection], color: [u8; 3]) -> RgbImage {
    let mut canvas = image.clone();
    for detection in detections {
      self.draw_one(&mut canvas, detection, color);
    }
    canvas
  }

  fn draw_one(&self, canvas: &mut RgbImage, detection: &Detection, color: [u8; 3]) {
    let (iw, ih) = (canvas.width() as i32, canvas.height() as i32);
    if iw == 0 || ih == 0 {
      return;
    }

    let x1 = (detection.bbox.x1.floor() as i32).clamp(0, iw - 1);
    let y1 = (detection.bbox.y1.floor() as i32).clamp(0, ih - 1);
    let x2 = (detection.bbox.x2.ceil() as i32).clamp(0, iw);
    let y2 = (detection.bbox.y2.ceil() as i32).clamp(0, ih);
    if x2 <= x1 || y2 <= y1 {
      return;
    }

    // 边框，第二圈描边加粗到 2 像素
    let rect = Rect::at(x1, y1).of_size((x2 - x1) as u32, (y2 - y1) as u32);
    draw_hollow_rect_mut(canvas, rect, Rgb(color));
    if x2 - x1 > 2 && y2 - y1 > 2 {
      let inner = Rect::at(x1 + 1, y1 + 1).of_size((x2 - x1 - 2) as u32, (y2 - y1 - 2) as u32);
      draw_hollow_rect_mut(canvas, inner, Rgb(color));
    }

    let label = format!("{} {:.2}", detection.class_name, detection.confidence);
    let (text_w, text_h) = self.measure(&label);

    // 标签底色贴在框上沿，不越过 y=0
    let tag_y = (y1 - text_h - LABEL_TAG_PAD).max(0);
    let tag_w = (text_w + 6).min(iw - x1);
    let tag_h = y1 - tag_y;
    if tag_w > 0 && tag_h > 0 {
      let tag = Rect::at(x1, tag_y).of_size(tag_w as u32, tag_h as u32);
      draw_filled_rect_mut(canvas, tag, Rgb(color));

      if let Some(font) = &self.font {
        let text_y = (y1 - text_h - 3).max(0);
        draw_text_mut(
          canvas,
          Rgb([0u8, 0, 0]),
          x1 + 3,
          text_y,
          PxScale::from(self.font_size),
          font,
          &label,
        );
      }
    }
  }
}

/// 编码为 PNG 字节流
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
  let mut buffer = Cursor::new(Vec::new());
  image.write_to(&mut buffer, image::ImageFormat::Png)?;
  Ok(buffer.into_inner())
}
