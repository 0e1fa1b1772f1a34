//! `<category>_<sequence>.<ext>` 形式のファイル名解析

use thiserror::Error;

/// 解析済みファイル名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFileName<'a> {
    /// 最初の `_` より前
    pub category: &'a str,
    /// `_` と次の `.` の間の数値
    pub sequence: u64,
    /// 最初の `.` 以降
    pub extension: &'a str,
}

/// ファイル名の形式不正（走査は継続）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileNameError {
    #[error("file name is not valid UTF-8")]
    NotUtf8,
    #[error("missing '_' separator")]
    MissingSeparator,
    #[error("missing extension")]
    MissingExtension,
    #[error("empty category")]
    EmptyCategory,
    #[error("sequence number {0:?} is not a non-negative integer")]
    InvalidSequence(String),
}

pub fn parse_file_name(name: &str) -> Result<ImageFileName<'_>, FileNameError> {
    let (category, rest) = name.split_once('_').ok_or(FileNameError::MissingSeparator)?;
    if category.is_empty() {
        return Err(FileNameError::EmptyCategory);
    }

    let (number, extension) = rest.split_once('.').ok_or(FileNameError::MissingExtension)?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FileNameError::InvalidSequence(number.to_string()));
    }
    // 桁あふれ
    let sequence = number
        .parse::<u64>()
        .map_err(|_| FileNameError::InvalidSequence(number.to_string()))?;

    Ok(ImageFileName {
        category,
        sequence,
        extension,
    })
}
