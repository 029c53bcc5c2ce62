// 该文件是 AeroVision 项目的一部分。
// src/upload.rs - 上传文件校验
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

use thiserror::Error;

/// 允许上传的 SAR 图像扩展名
pub const ALLOWED_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tiff", "tif"];

/// 请求中名为 `file` 的表单字段
#[derive(Debug, Clone, Default)]
pub struct FilePart {
  pub file_name: Option<String>,
  pub bytes: Vec<u8>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
  #[error("No file part in the request. Please select an image.")]
  MissingFilePart,
  #[error("No selected file. Please choose an image to upload.")]
  EmptyFilename,
  #[error("Invalid file type. Please upload a supported image format.")]
  UnsupportedExtension(String),
}

/// 已通过校验的上传文件
#[derive(Debug, Clone)]
pub struct ValidatedFile {
  original_name: String,
  extension: String,
  bytes: Vec<u8>,
}

impl ValidatedFile {
  pub fn original_name(&self) -> &str {
    &self.original_name
  }

  /// 小写扩展名
  pub fn extension(&self) -> &str {
    &self.extension
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }
}

/// 最后一个 `.` 之后的后缀
pub fn extension(filename: &str) -> Option<&str> {
  filename.rsplit_once('.').map(|(_, ext)| ext)
}

pub fn allowed(filename: &str) -> bool {
  extension(filename)
    .map(|ext| ALLOWED_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
    .unwrap_or(false)
}

pub fn validate(part: Option<FilePart>) -> Result<ValidatedFile, ValidationError> {
  let part = part.ok_or(ValidationError::MissingFilePart)?;

  let original_name = match part.file_name {
    Some(name) if !name.is_empty() => name,
    _ => return Err(ValidationError::EmptyFilename),
  };

  if !allowed(&original_name) {
    return Err(ValidationError::UnsupportedExtension(original_name));
  }

  let extension = extension(&original_name)
    .unwrap_or_default()
    .to_ascii_lowercase();

  Ok(ValidatedFile {
    original_name,
    extension,
    bytes: part.bytes,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn part(name: Option<&str>) -> Option<FilePart> {
    Some(FilePart {
      file_name: name.map(str::to_string),
      bytes: vec![1, 2, 3],
    })
  }

  #[test]
  fn extension_check_is_case_insensitive() {
    assert!(allowed("x.PNG"));
    assert!(allowed("scene.Tif"));
    assert!(allowed("a.b.jpeg"));
    assert!(!allowed("x"));
    assert!(!allowed("x.gif"));
    assert!(!allowed("x."));
    assert!(!allowed("png"));
  }

  #[test]
  fn every_allowed_extension_passes() {
    for ext in ALLOWED_EXTENSIONS {
      assert!(allowed(&format!("image.{}", ext)), "{}", ext);
      assert!(allowed(&format!("image.{}", ext.to_uppercase())), "{}", ext);
    }
  }

  #[test]
  fn missing_part_and_empty_name_are_rejected() {
    assert_eq!(validate(None).unwrap_err(), ValidationError::MissingFilePart);
    assert_eq!(validate(part(None)).unwrap_err(), ValidationError::EmptyFilename);
    assert_eq!(validate(part(Some(""))).unwrap_err(), ValidationError::EmptyFilename);
  }

  #[test]
  fn unsupported_extension_message_is_fixed() {
    let err = validate(part(Some("plane.gif"))).unwrap_err();
    assert!(matches!(err, ValidationError::UnsupportedExtension(_)));
    assert!(err.to_string().starts_with("Invalid file type"));
  }

  #[test]
  fn valid_file_keeps_name_and_bytes() {
    let file = validate(part(Some("Scene 01.JPG"))).unwrap();
    assert_eq!(file.original_name(), "Scene 01.JPG");
    assert_eq!(file.extension(), "jpg");
    assert_eq!(file.bytes(), &[1, 2, 3]);
  }
}
