//! カテゴリ名とクラスIDの対応表

use std::collections::HashMap;

use crate::dataset::error::DatasetError;

/// 車両カテゴリ（クラスID順）
pub const VEHICLE_CATEGORIES: [&str; 10] = [
    "ambulance",
    "bicycle",
    "bus",
    "car",
    "limousine",
    "motorcycle",
    "tank",
    "taxi",
    "truck",
    "van",
];

/// カテゴリ名 <-> クラスID の双方向マッピング
///
/// 起動時に一度だけ構築し、以降は変更しません。
/// ローダーや推論エンジンには参照で明示的に渡します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryIndex {
    names: Vec<String>,
    codes: HashMap<String, usize>,
}

impl CategoryIndex {
    /// 名前の並び順でクラスIDを割り当てる
    ///
    /// 空リスト、重複、空文字列、`_` を含む名前は拒否します
    /// （`_` はファイル名のカテゴリ区切りのため）。
    pub fn new<I, S>(names: I) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(DatasetError::InvalidCategoryIndex {
                reason: "category list is empty".to_string(),
            });
        }

        let mut codes = HashMap::with_capacity(names.len());
        for (code, name) in names.iter().enumerate() {
            if name.is_empty() || name.contains('_') {
                return Err(DatasetError::InvalidCategoryIndex {
                    reason: format!("category name {:?} must be non-empty and must not contain '_'", name),
                });
            }
            if codes.insert(name.clone(), code).is_some() {
                return Err(DatasetError::InvalidCategoryIndex {
                    reason: format!("duplicate category {:?}", name),
                });
            }
        }

        Ok(Self { names, codes })
    }

    /// 10種類の車両カテゴリ
    pub fn vehicles() -> Self {
        let names: Vec<String> = VEHICLE_CATEGORIES.iter().map(|s| s.to_string()).collect();
        let codes = names
            .iter()
            .enumerate()
            .map(|(code, name)| (name.clone(), code))
            .collect();
        Self { names, codes }
    }

    pub fn code(&self, name: &str) -> Option<usize> {
        self.codes.get(name).copied()
    }

    pub fn name(&self, code: usize) -> Option<&str> {
        self.names.get(code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for CategoryIndex {
    fn default() -> Self {
        Self::vehicles()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_codes_follow_declaration_order() {
        let index = CategoryIndex::vehicles();
        assert_eq!(index.len(), 10);
        for (code, name) in VEHICLE_CATEGORIES.iter().enumerate() {
            assert_eq!(index.code(name), Some(code));
            assert_eq!(index.name(code), Some(*name));
        }
        assert_eq!(index.code("alien"), None);
        assert_eq!(index.name(10), None);
    }

    #[test]
    fn test_custom_index_matches_vehicles() {
        let custom = CategoryIndex::new(VEHICLE_CATEGORIES).unwrap();
        assert_eq!(custom, CategoryIndex::vehicles());
    }

    #[test]
    fn test_rejects_invalid_names() {
        assert!(CategoryIndex::new(Vec::<String>::new()).is_err());
        assert!(CategoryIndex::new(["car", "car"]).is_err());
        assert!(CategoryIndex::new(["fire_truck"]).is_err());
        assert!(CategoryIndex::new([""]).is_err());

        let err = CategoryIndex::new(["bus", "bus"]).unwrap_err();
        assert_eq!(err.kind(), crate::dataset::DatasetErrorKind::Configuration);
    }
}
