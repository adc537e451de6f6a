use crate::classifier::{Category, Condition};
use crate::config::schema::ClassificationRule;

const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Furniture,
        &[
            "chair", "table", "desk", "dresser", "cabinet", "sofa", "settee", "bench", "stool",
            "armoire", "bookcase", "sideboard", "nightstand", "chest of drawers", "ottoman",
            "wardrobe", "credenza", "hutch", "rocker",
        ],
    ),
    (
        Category::Jewelry,
        &[
            "ring", "necklace", "bracelet", "brooch", "earrings", "pendant", "locket",
            "cufflinks", "14k", "18k", "diamond", "sapphire", "pearl",
        ],
    ),
    (
        Category::Watches,
        &[
            "watch", "wristwatch", "pocket watch", "chronograph", "clock", "mantel clock",
        ],
    ),
    (
        Category::Art,
        &[
            "painting", "oil on canvas", "watercolor", "lithograph", "etching", "sculpture",
            "portrait", "print", "framed",
        ],
    ),
    (
        Category::Ceramics,
        &[
            "teapot", "porcelain", "pottery", "stoneware", "earthenware", "ceramic", "figurine",
            "platter", "teacup", "saucer", "crock", "vase", "majolica", "bowl",
        ],
    ),
    (
        Category::Glassware,
        &[
            "glass", "crystal", "decanter", "goblet", "carnival glass", "depression glass",
            "stemware", "tumbler", "paperweight",
        ],
    ),
    (
        Category::Silver,
        &[
            "sterling", "silverplate", "silver plate", "flatware", "silver", "candelabra",
            "tea service", "spoon",
        ],
    ),
    (
        Category::Coins,
        &[
            "coin", "coins", "half dollar", "silver dollar", "morgan dollar", "proof set",
            "bullion", "penny",
        ],
    ),
    (
        Category::Books,
        &[
            "book", "books", "first edition", "atlas", "manuscript", "bible", "encyclopedia",
        ],
    ),
    (
        Category::Electronics,
        &[
            "radio", "television", "phonograph", "camera", "stereo", "turntable",
            "record player", "amplifier", "speaker",
        ],
    ),
    (
        Category::Toys,
        &[
            "doll", "teddy bear", "toy", "train set", "marbles", "tin toy", "action figure",
            "board game", "puzzle",
        ],
    ),
    (
        Category::Clothing,
        &[
            "dress", "coat", "jacket", "hat", "scarf", "handbag", "purse", "shoes", "boots",
            "gloves",
        ],
    ),
    (
        Category::Tools,
        &[
            "hammer", "saw", "wrench", "hand plane", "chisel", "drill", "anvil", "toolbox",
            "vise",
        ],
    ),
    (
        Category::Collectibles,
        &[
            "stamp", "postcard", "advertising sign", "memorabilia", "autograph", "trading card",
            "baseball card", "comic", "lunchbox", "quilt",
        ],
    ),
];

const CONDITION_KEYWORDS: &[(Condition, &[&str])] = &[
    (
        Condition::New,
        &["new", "new in box", "nib", "sealed", "unused"],
    ),
    (Condition::LikeNew, &["like new", "near mint", "mint"]),
    (Condition::Excellent, &["excellent", "pristine"]),
    (Condition::Good, &["good", "gently used", "light wear"]),
    (Condition::Fair, &["fair", "worn", "wear", "minor wear"]),
    (
        Condition::Poor,
        &["poor", "damaged", "cracked", "chipped", "broken", "stained", "heavily worn"],
    ),
    (
        Condition::ForParts,
        &["for parts", "parts only", "not working", "as is", "needs repair"],
    ),
];

/// The built-in rule table: one rule per category, then one per condition.
/// Priorities descend in declaration order so earlier categories win ties.
pub fn default_rules() -> Vec<ClassificationRule> {
    let mut rules = Vec::new();
    let mut priority = (CATEGORY_KEYWORDS.len() + CONDITION_KEYWORDS.len()) as i32 * 10;

    for (category, keywords) in CATEGORY_KEYWORDS {
        rules.push(ClassificationRule {
            id: format!("category-{}", category.as_str().replace('_', "-")),
            priority,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            category: Some(*category),
            condition: None,
        });
        priority -= 10;
    }

    for (condition, keywords) in CONDITION_KEYWORDS {
        rules.push(ClassificationRule {
            id: format!("condition-{}", condition.as_str().replace('_', "-")),
            priority,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            category: None,
            condition: Some(*condition),
        });
        priority -= 10;
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_rule_ids_are_unique() {
        let rules = default_rules();
        let ids: HashSet<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), rules.len());
    }

    #[test]
    fn test_every_category_but_other_has_a_rule() {
        let rules = default_rules();
        for category in Category::ALL {
            let covered = rules.iter().any(|r| r.category == Some(category));
            assert_eq!(covered, category != Category::Other, "{}", category);
        }
    }

    #[test]
    fn test_priorities_follow_category_order() {
        let rules = default_rules();
        assert!(rules.windows(2).all(|w| w[0].priority > w[1].priority));
        assert_eq!(rules[0].category, Some(Category::Furniture));
    }
}
