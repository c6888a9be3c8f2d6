// 该文件是 Shitu （识途） 项目的一部分。
// src/label.rs - 交通标志类别名称表
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

/// 越南语交通标志类别名称，顺序与训练模型的类别编号一致
pub const VN_SIGN_NAMES: [&str; 19] = [
  "Cam_Dau_Xe",
  "Cam_Di_Nguoc_Chieu",
  "Cam_Dung_Va_Dau_Xe",
  "Cam_O_To",
  "Cam_Re_Trai",
  "Cam_XeTai_XeKhach",
  "Cam_Xe_Tai",
  "Chi_Huong_Di_Phai",
  "Cho_Quay_Xe",
  "Den_Giao_Thong",
  "Duong_Co_Go_Giam_Toc",
  "Duong_Cong_Ben_Phai",
  "Duong_Nguoi_Di_Bo_Cat_Ngang",
  "Duong_Nguoi_Di_Bo_Sang_Ngang",
  "Giao_Nhau_Duong_Uu_Tien",
  "Gioi_Han_Toc_Do_25",
  "Tre_Em",
  "Vong_Xuyen",
  "Xe_Bus",
];

/// 编号落在表外时的通用占位名称（"交通标志"）
pub const UNKNOWN_SIGN_NAME: &str = "Biển báo";

/// 类别编号到本地化名称的查找
pub fn class_name(class_id: u32) -> &'static str {
  VN_SIGN_NAMES
    .get(class_id as usize)
    .copied()
    .unwrap_or(UNKNOWN_SIGN_NAME)
}

pub fn num_classes() -> usize {
  VN_SIGN_NAMES.len()
}
