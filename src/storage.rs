// 该文件是 AeroVision 项目的一部分。
// src/storage.rs - 上传与结果图像存储
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

use std::{
  fs::{File, OpenOptions},
  io::{BufWriter, ErrorKind, Write},
  path::{Path, PathBuf},
};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Local;
use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::upload::{self, ValidatedFile};

pub const UPLOAD_FOLDER: &str = "uploads";
pub const RESULTS_FOLDER: &str = "results";

const RESULT_PREFIX: &str = "detected_";
const RESULT_EXTENSION: &str = "jpg";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";
const FALLBACK_STEM: &str = "upload";
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("cannot create directory {}: {source}", path.display())]
  CreateDir {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("{0}")]
  Write(std::io::Error),
  #[error("{0}")]
  Image(#[from] image::ImageError),
  #[error("cannot read {}: {source}", path.display())]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("artifact not found: {0}")]
  NotFound(String),
}

/// 一次被接受的上传，落盘后不再修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
  pub original_name: String,
  pub stored_name: String,
  pub stored_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
  Upload,
  Result,
}

/// 两个平铺目录，文件名即是对外地址
#[derive(Debug, Clone)]
pub struct Storage {
  upload_dir: PathBuf,
  result_dir: PathBuf,
}

impl Default for Storage {
  fn default() -> Self {
    Storage::new(UPLOAD_FOLDER, RESULTS_FOLDER)
  }
}

/// 去掉路径分隔符和不安全字符，空白折叠为 `_`，并剥离首尾的 `.` 与 `_`
pub fn sanitize_filename(name: &str) -> String {
  let replaced: String = name
    .chars()
    .map(|c| match c {
      '/' | '\\' => ' ',
      c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => c,
      c if c.is_whitespace() => ' ',
      _ => '\0',
    })
    .filter(|c| *c != '\0')
    .collect();

  replaced
    .split_whitespace()
    .collect::<Vec<_>>()
    .join("_")
    .trim_matches(|c| c == '.' || c == '_')
    .to_string()
}

/// `detected_<stem>.jpg`
pub fn result_name(stored_name: &str) -> String {
  let stem = Path::new(stored_name)
    .file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or(stored_name);
  format!("{}{}.{}", RESULT_PREFIX, stem, RESULT_EXTENSION)
}

fn write_jpeg(file: File, image: &RgbImage) -> Result<(), StorageError> {
  let mut writer = BufWriter::new(file);
  image.write_to(&mut writer, ImageFormat::Jpeg)?;
  writer.flush().map_err(StorageError::Write)
}

fn is_plain_filename(name: &str) -> bool {
  !name.is_empty()
    && name != "."
    && name != ".."
    && !name.contains(['/', '\\', '\0'])
}

impl Storage {
  pub fn new(upload_dir: impl Into<PathBuf>, result_dir: impl Into<PathBuf>) -> Self {
    Storage {
      upload_dir: upload_dir.into(),
      result_dir: result_dir.into(),
    }
  }

  pub fn upload_dir(&self) -> &Path {
    &self.upload_dir
  }

  pub fn result_dir(&self) -> &Path {
    &self.result_dir
  }

  pub fn ensure_directories(&self) -> Result<(), StorageError> {
    for dir in [&self.upload_dir, &self.result_dir] {
      std::fs::create_dir_all(dir).map_err(|source| StorageError::CreateDir {
        path: dir.clone(),
        source,
      })?;
      debug!("存储目录就绪: {}", dir.display());
    }
    Ok(())
  }

  pub fn save_original(&self, file: &ValidatedFile) -> Result<UploadedAsset, StorageError> {
    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    self.save_original_at(file, &timestamp)
  }

  /// 以给定时间戳落盘，上传名或对应的结果名已被占用时在时间戳后追加序号
  pub(crate) fn save_original_at(
    &self,
    file: &ValidatedFile,
    timestamp: &str,
  ) -> Result<UploadedAsset, StorageError> {
    let safe_name = {
      let sanitized = sanitize_filename(file.original_name());
      let keeps_extension = upload::extension(&sanitized)
        .map(|ext| ext.eq_ignore_ascii_case(file.extension()))
        .unwrap_or(false);
      if keeps_extension {
        sanitized
      } else {
        format!("{}.{}", FALLBACK_STEM, file.extension())
      }
    };

    for attempt in 0..MAX_NAME_ATTEMPTS {
      let stored_name = if attempt == 0 {
        format!("{}_{}", timestamp, safe_name)
      } else {
        format!("{}_{}_{}", timestamp, attempt, safe_name)
      };
      let stored_path = self.upload_dir.join(&stored_name);

      // 扩展名不参与结果命名，`a.png` 与 `a.jpg` 会落到同一个结果文件
      if self.result_dir.join(result_name(&stored_name)).exists() {
        warn!("结果文件名冲突: {}", stored_name);
        continue;
      }

      let mut handle = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&stored_path)
      {
        Ok(handle) => handle,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
          warn!("文件名冲突: {}", stored_name);
          continue;
        }
        Err(e) => return Err(StorageError::Write(e)),
      };

      if let Err(e) = handle.write_all(file.bytes()) {
        let _ = std::fs::remove_file(&stored_path);
        return Err(StorageError::Write(e));
      }

      info!("上传文件已保存: {}", stored_path.display());
      return Ok(UploadedAsset {
        original_name: file.original_name().to_string(),
        stored_name,
        stored_path,
      });
    }

    Err(StorageError::Write(std::io::Error::new(
      ErrorKind::AlreadyExists,
      format!("no free name for {} at {}", safe_name, timestamp),
    )))
  }

  /// 结果文件只创建不覆盖，已存在时报错
  pub fn save_result(&self, stored_name: &str, image: &RgbImage) -> Result<PathBuf, StorageError> {
    let path = self.result_dir.join(result_name(stored_name));
    let file = OpenOptions::new()
      .write(true)
      .create_new(true)
      .open(&path)
      .map_err(StorageError::Write)?;

    if let Err(e) = write_jpeg(file, image) {
      let _ = std::fs::remove_file(&path);
      return Err(e);
    }

    info!("结果图像已保存: {}", path.display());
    Ok(path)
  }

  pub fn read_as_transport_encoding(&self, path: &Path) -> Result<String, StorageError> {
    let bytes = std::fs::read(path).map_err(|source| StorageError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(STANDARD.encode(bytes))
  }

  /// 按存储文件名读取产物，拒绝任何带路径成分的名字
  pub fn open_artifact(&self, kind: ArtifactKind, filename: &str) -> Result<Vec<u8>, StorageError> {
    if !is_plain_filename(filename) {
      warn!("拒绝非法文件名: {:?}", filename);
      return Err(StorageError::NotFound(filename.to_string()));
    }

    let dir = match kind {
      ArtifactKind::Upload => &self.upload_dir,
      ArtifactKind::Result => &self.result_dir,
    };
    let path = dir.join(filename);

    match std::fs::read(&path) {
      Ok(bytes) => Ok(bytes),
      Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(filename.to_string())),
      Err(source) => Err(StorageError::Read { path, source }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::upload::{FilePart, validate};

  fn validated(name: &str, bytes: &[u8]) -> ValidatedFile {
    validate(Some(FilePart {
      file_name: Some(name.to_string()),
      bytes: bytes.to_vec(),
    }))
    .unwrap()
  }

  fn storage() -> (tempfile::TempDir, Storage) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path().join(UPLOAD_FOLDER), dir.path().join(RESULTS_FOLDER));
    storage.ensure_directories().unwrap();
    (dir, storage)
  }

  #[test]
  fn sanitize_strips_paths_and_unsafe_characters() {
    assert_eq!(sanitize_filename("../../etc/passwd.png"), "etc_passwd.png");
    assert_eq!(sanitize_filename("My Scene (1).tif"), "My_Scene_1.tif");
    assert_eq!(sanitize_filename("C:\\data\\img.bmp"), "C_data_img.bmp");
    assert_eq!(sanitize_filename("__.hidden.jpg"), "hidden.jpg");
    assert_eq!(sanitize_filename("机场.png"), "png");
  }

  #[test]
  fn ensure_directories_is_idempotent() {
    let (_dir, storage) = storage();
    storage.ensure_directories().unwrap();
    assert!(storage.upload_dir().is_dir());
    assert!(storage.result_dir().is_dir());
  }

  #[test]
  fn stored_name_has_timestamp_prefix() {
    let (_dir, storage) = storage();
    let asset = storage.save_original(&validated("plane.PNG", b"abc")).unwrap();

    // YYYYmmdd_HHMMSS_ffffff_
    let (timestamp, rest) = asset.stored_name.split_at(22);
    assert_eq!(rest, "_plane.PNG");
    assert_eq!(timestamp.len(), 22);
    assert!(timestamp.chars().all(|c| c.is_ascii_digit() || c == '_'));
    assert_eq!(asset.original_name, "plane.PNG");
    assert_eq!(std::fs::read(&asset.stored_path).unwrap(), b"abc");
  }

  #[test]
  fn same_instant_same_name_never_overwrites() {
    let (_dir, storage) = storage();
    let file = validated("scene.png", b"first");
    let first = storage.save_original_at(&file, "20260101_000000_000001").unwrap();
    let second = storage
      .save_original_at(&validated("scene.png", b"second"), "20260101_000000_000001")
      .unwrap();

    assert_ne!(first.stored_name, second.stored_name);
    assert_eq!(std::fs::read(&first.stored_path).unwrap(), b"first");
    assert_eq!(std::fs::read(&second.stored_path).unwrap(), b"second");
  }

  #[test]
  fn non_ascii_name_falls_back_to_generic_stem() {
    let (_dir, storage) = storage();
    let asset = storage
      .save_original_at(&validated("机场.png", b"x"), "20260101_000000_000001")
      .unwrap();
    assert_eq!(asset.stored_name, "20260101_000000_000001_upload.png");
  }

  #[test]
  fn result_is_named_from_stored_stem_as_jpeg() {
    let (_dir, storage) = storage();
    assert_eq!(result_name("20260101_000000_000001_scene.tif"), "detected_20260101_000000_000001_scene.jpg");

    let image = RgbImage::from_pixel(8, 8, image::Rgb([200, 100, 50]));
    let path = storage.save_result("20260101_000000_000001_scene.tif", &image).unwrap();
    assert_eq!(path.parent().unwrap(), storage.result_dir());
    assert_eq!(image::open(&path).unwrap().width(), 8);
  }

  #[test]
  fn names_sharing_a_stem_get_distinct_results() {
    let (_dir, storage) = storage();
    let timestamp = "20260101_000000_000001";
    let small = RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
    let large = RgbImage::from_pixel(8, 8, image::Rgb([30, 20, 10]));

    let png = storage.save_original_at(&validated("a.png", b"png"), timestamp).unwrap();
    let first = storage.save_result(&png.stored_name, &small).unwrap();

    let jpg = storage.save_original_at(&validated("a.jpg", b"jpg"), timestamp).unwrap();
    assert_eq!(jpg.stored_name, "20260101_000000_000001_1_a.jpg");
    let second = storage.save_result(&jpg.stored_name, &large).unwrap();

    assert_ne!(first, second);
    assert_eq!(image::open(&first).unwrap().width(), 4);
    assert_eq!(image::open(&second).unwrap().width(), 8);
  }

  #[test]
  fn existing_result_is_never_overwritten() {
    let (_dir, storage) = storage();
    let image = RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]));
    let path = storage.save_result("20260101_000000_000001_a.png", &image).unwrap();

    let other = RgbImage::from_pixel(8, 8, image::Rgb([3, 2, 1]));
    let again = storage.save_result("20260101_000000_000001_a.jpg", &other);
    assert!(matches!(again, Err(StorageError::Write(_))));
    assert_eq!(image::open(&path).unwrap().width(), 4);
  }

  #[test]
  fn transport_encoding_is_base64() {
    let (_dir, storage) = storage();
    let asset = storage.save_original(&validated("a.png", b"hello")).unwrap();
    assert_eq!(storage.read_as_transport_encoding(&asset.stored_path).unwrap(), "aGVsbG8=");

    let missing = storage.read_as_transport_encoding(&storage.upload_dir().join("gone.png"));
    assert!(matches!(missing, Err(StorageError::Read { .. })));
  }

  #[test]
  fn artifacts_are_served_only_by_plain_name() {
    let (_dir, storage) = storage();
    let asset = storage.save_original(&validated("a.png", b"bytes")).unwrap();

    let bytes = storage.open_artifact(ArtifactKind::Upload, &asset.stored_name).unwrap();
    assert_eq!(bytes, b"bytes");

    for name in ["", "..", "../uploads/x.png", "a\\b.png"] {
      assert!(matches!(
        storage.open_artifact(ArtifactKind::Upload, name),
        Err(StorageError::NotFound(_))
      ));
    }
    assert!(matches!(
      storage.open_artifact(ArtifactKind::Result, &asset.stored_name),
      Err(StorageError::NotFound(_))
    ));
  }
}
