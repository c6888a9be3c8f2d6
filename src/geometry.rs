// 该文件是 Shitu （识途） 项目的一部分。
// src/geometry.rs - 检测框几何工具
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

/// 噪声级小框的面积下限（平方像素）
const MIN_BOX_AREA: f32 = 500.0;
/// 长宽比上限，超过视为与真实标志形状不符的细条
const MAX_ASPECT_RATIO: f32 = 4.0;

/// 像素坐标下的轴对齐矩形框，(x1, y1) 为左上角，(x2, y2) 为右下角
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl BoundingBox {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  /// 将四个坐标逐一夹取到 `[0, W] × [0, H]` 范围内
  pub fn clamp_to(&self, width: f32, height: f32) -> BoundingBox {
    BoundingBox {
      x1: self.x1.clamp(0.0, width),
      y1: self.y1.clamp(0.0, height),
      x2: self.x2.clamp(0.0, width),
      y2: self.y2.clamp(0.0, height),
    }
  }

  /// 几何校验，按顺序检查:
  /// 1. 宽高必须为正；
  /// 2. 面积必须大于 500 平方像素；
  /// 3. 长宽比（任一方向）必须小于 4；
  /// 4. 不得越出图像边界（对已夹取的框该检查恒通过，属于防护性检查）。
  pub fn is_valid(&self, width: f32, height: f32) -> bool {
    let w = self.width();
    let h = self.height();
    if w <= 0.0 || h <= 0.0 {
      return false;
    }
    if w * h <= MIN_BOX_AREA {
      return false;
    }
    let ratio_wh = if h > 0.0 { w / h } else { 0.0 };
    let ratio_hw = if w > 0.0 { h / w } else { 0.0 };
    if ratio_wh >= MAX_ASPECT_RATIO || ratio_hw >= MAX_ASPECT_RATIO {
      return false;
    }
    if self.x1 < 0.0 || self.y1 < 0.0 || self.x2 > width || self.y2 > height {
      return false;
    }
    true
  }

  /// 先夹取再校验。贴齐边界的坐标只有来自夹取结果才视为有效。
  pub fn validate_and_clamp(&self, width: f32, height: f32) -> Option<BoundingBox> {
    let clamped = self.clamp_to(width, height);
    clamped.is_valid(width, height).then_some(clamped)
  }
}

/// 归一化框: 相对图像尺寸的 [0, 1] 分数坐标，供与分辨率无关的消费方使用
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
}

impl NormalizedBox {
  /// 由像素框与图像尺寸导出；W 或 H 为 0 时对应分量返回 0.0，避免除零
  pub fn from_box(bbox: &BoundingBox, width: f32, height: f32) -> Self {
    let frac = |value: f32, denom: f32| if denom > 0.0 { value / denom } else { 0.0 };
    NormalizedBox {
      x: frac(bbox.x1, width),
      y: frac(bbox.y1, height),
      w: frac(bbox.width(), width),
      h: frac(bbox.height(), height),
    }
  }
}
