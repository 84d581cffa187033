//! Kitchen category classification.
//!
//! Maps product/category names and combo group headers onto the fixed set of
//! kitchen categories the board groups by. Matching is ordered keyword
//! lookup, first match wins: an explicit category name beats product-name
//! heuristics, and anything unmatched lands in à la carte. Station labels
//! and default prep times hang off the category; they drive grouping and
//! estimation only, never correctness.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KitchenCategory {
    Appetizers,
    MainCourse,
    Beverages,
    Desserts,
    ALaCarte,
    Additional,
}

impl KitchenCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appetizers => "appetizers",
            Self::MainCourse => "main_course",
            Self::Beverages => "beverages",
            Self::Desserts => "desserts",
            Self::ALaCarte => "a_la_carte",
            Self::Additional => "additional",
        }
    }

    /// Kitchen work-area label used for display grouping.
    pub fn station(&self) -> &'static str {
        match self {
            Self::Appetizers => "前菜",
            Self::MainCourse => "熱廚",
            Self::Beverages => "飲品",
            Self::Desserts => "甜點",
            Self::Additional => "加點",
            Self::ALaCarte => "綜合",
        }
    }

    /// Default prep estimate in minutes when the product carries none.
    pub fn default_prep_minutes(&self) -> i64 {
        match self {
            Self::Appetizers => 8,
            Self::MainCourse => 15,
            Self::Beverages => 3,
            Self::Desserts => 6,
            Self::ALaCarte => 10,
            Self::Additional => 5,
        }
    }

    pub fn all() -> [KitchenCategory; 6] {
        [
            Self::Appetizers,
            Self::MainCourse,
            Self::Beverages,
            Self::Desserts,
            Self::ALaCarte,
            Self::Additional,
        ]
    }
}

impl std::fmt::Display for KitchenCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword tables, checked in order. Menus mix CJK and English names so both
/// spellings are listed. Order matters: "加點" must win before any broader
/// main-course keyword can claim the name.
const KEYWORDS: &[(KitchenCategory, &[&str])] = &[
    (
        KitchenCategory::Additional,
        &["加點", "附加", "additional", "add-on", "addon", "extra", "side"],
    ),
    (
        KitchenCategory::Appetizers,
        &[
            "前菜", "開胃", "沙拉", "小菜", "appetizer", "starter", "salad",
        ],
    ),
    (
        KitchenCategory::Beverages,
        &[
            // No bare "tea": it is a substring of "steak".
            "飲品", "飲料", "茶", "咖啡", "果汁", "汽水", "啤酒", "beverage", "drink",
            "milk tea", "iced tea", "coffee", "juice", "soda", "beer", "latte",
        ],
    ),
    (
        KitchenCategory::Desserts,
        &[
            "甜點", "甜品", "蛋糕", "冰淇淋", "布丁", "dessert", "cake", "ice cream",
            "pudding",
        ],
    ),
    (
        KitchenCategory::MainCourse,
        &[
            "主餐", "主菜", "套餐", "排餐", "牛排", "雞腿", "豬排", "魚排", "飯", "麵",
            "main", "steak", "chicken", "pork", "fish", "rice", "noodle", "pasta",
            "burger",
        ],
    ),
];

fn match_keywords(name: &str) -> Option<KitchenCategory> {
    let lowered = name.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    for (category, keywords) in KEYWORDS {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return Some(*category);
        }
    }
    None
}

/// Classify one task: explicit category name first, then product-name
/// heuristics, then the à la carte catch-all.
pub fn classify(category_name: Option<&str>, product_name: &str) -> KitchenCategory {
    if let Some(category) = category_name.and_then(match_keywords) {
        return category;
    }
    match_keywords(product_name).unwrap_or(KitchenCategory::ALaCarte)
}

/// Classify a combo group header ("主餐", "飲品", ...). Same tables as task
/// classification; headers are short so substring matching is enough.
pub fn classify_group_header(header: &str) -> KitchenCategory {
    match_keywords(header).unwrap_or(KitchenCategory::ALaCarte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_category_name_wins_over_product_heuristics() {
        assert_eq!(
            classify(Some("飲品"), "牛排三明治"),
            KitchenCategory::Beverages
        );
        assert_eq!(
            classify(Some("Desserts"), "Iced Coffee"),
            KitchenCategory::Desserts
        );
    }

    #[test]
    fn product_name_heuristics_apply_without_category() {
        assert_eq!(classify(None, "招牌牛排"), KitchenCategory::MainCourse);
        assert_eq!(classify(None, "凱薩沙拉"), KitchenCategory::Appetizers);
        assert_eq!(classify(None, "紅茶"), KitchenCategory::Beverages);
        assert_eq!(classify(None, "提拉米蘇蛋糕"), KitchenCategory::Desserts);
    }

    #[test]
    fn unmatched_names_fall_back_to_a_la_carte() {
        assert_eq!(classify(None, "本日特選"), KitchenCategory::ALaCarte);
        assert_eq!(classify(Some("????"), "???"), KitchenCategory::ALaCarte);
    }

    #[test]
    fn group_headers_map_to_stations() {
        assert_eq!(classify_group_header("主餐"), KitchenCategory::MainCourse);
        assert_eq!(classify_group_header("飲品"), KitchenCategory::Beverages);
        assert_eq!(classify_group_header("甜點"), KitchenCategory::Desserts);
        assert_eq!(classify_group_header("加點"), KitchenCategory::Additional);
    }

    #[test]
    fn additional_beats_main_course_keywords() {
        // "加點牛排" is an add-on line even though it names a main.
        assert_eq!(classify(None, "加點牛排"), KitchenCategory::Additional);
    }

    #[test]
    fn every_category_has_station_and_estimate() {
        for category in KitchenCategory::all() {
            assert!(!category.station().is_empty());
            assert!(category.default_prep_minutes() > 0);
        }
    }
}
