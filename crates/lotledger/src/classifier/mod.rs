pub mod matcher;
pub mod rules;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use matcher::{Classification, Classifier};
pub use rules::default_rules;

/// Item category. Declaration order is the built-in rule priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Furniture,
    Jewelry,
    Watches,
    Art,
    Ceramics,
    Glassware,
    Silver,
    Coins,
    Books,
    Electronics,
    Toys,
    Clothing,
    Tools,
    Collectibles,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 15] = [
        Category::Furniture,
        Category::Jewelry,
        Category::Watches,
        Category::Art,
        Category::Ceramics,
        Category::Glassware,
        Category::Silver,
        Category::Coins,
        Category::Books,
        Category::Electronics,
        Category::Toys,
        Category::Clothing,
        Category::Tools,
        Category::Collectibles,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Furniture => "furniture",
            Self::Jewelry => "jewelry",
            Self::Watches => "watches",
            Self::Art => "art",
            Self::Ceramics => "ceramics",
            Self::Glassware => "glassware",
            Self::Silver => "silver",
            Self::Coins => "coins",
            Self::Books => "books",
            Self::Electronics => "electronics",
            Self::Toys => "toys",
            Self::Clothing => "clothing",
            Self::Tools => "tools",
            Self::Collectibles => "collectibles",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    New,
    LikeNew,
    Excellent,
    Good,
    Fair,
    Poor,
    ForParts,
    #[default]
    Unknown,
}

impl Condition {
    pub const ALL: [Condition; 8] = [
        Condition::New,
        Condition::LikeNew,
        Condition::Excellent,
        Condition::Good,
        Condition::Fair,
        Condition::Poor,
        Condition::ForParts,
        Condition::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::LikeNew => "like_new",
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::ForParts => "for_parts",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown condition '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_str_round_trip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
        assert!("antiques".parse::<Category>().is_err());
    }

    #[test]
    fn test_condition_serde_names() {
        assert_eq!(
            serde_json::to_string(&Condition::LikeNew).unwrap(),
            "\"like_new\""
        );
        assert_eq!(
            serde_json::from_str::<Condition>("\"for_parts\"").unwrap(),
            Condition::ForParts
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Category::default(), Category::Other);
        assert_eq!(Condition::default(), Condition::Unknown);
    }
}
