use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::classifier::{Category, Condition};
use crate::config::schema::ClassificationRule;

const BASE_CONFIDENCE: f64 = 0.5;
const PER_EXTRA_HIT: f64 = 0.15;
const HIT_CEILING: f64 = 0.95;
const NAME_BONUS: f64 = 0.05;

pub struct Classifier {
    rules: Vec<ClassificationRule>,
    /// Pre-compiled keyword patterns, indexed by lower-cased keyword
    compiled_keywords: HashMap<String, Regex>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub condition: Condition,
    pub confidence: f64,
    pub matched_rules: Vec<String>,
}

impl Classification {
    pub fn fallback() -> Self {
        Self {
            category: Category::Other,
            condition: Condition::Unknown,
            confidence: 0.0,
            matched_rules: Vec::new(),
        }
    }
}

/// A rule that matched, with what it matched.
struct RuleHit<'a> {
    rule: &'a ClassificationRule,
    longest: usize,
    keywords: Vec<String>,
    in_name: bool,
}

impl Classifier {
    pub fn new(mut rules: Vec<ClassificationRule>) -> Self {
        // Stable sort keeps declaration order for equal priorities
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut compiled_keywords = HashMap::new();
        for rule in &rules {
            for keyword in &rule.keywords {
                let key = keyword.trim().to_lowercase();
                if key.is_empty() || compiled_keywords.contains_key(&key) {
                    continue;
                }
                if let Ok(regex) = Regex::new(&Self::keyword_pattern(&key)) {
                    compiled_keywords.insert(key, regex);
                }
            }
        }

        Self {
            rules,
            compiled_keywords,
        }
    }

    /// Case-insensitive, whole-word pattern for a literal keyword. Inner
    /// whitespace matches any run of whitespace.
    pub fn keyword_pattern(keyword: &str) -> String {
        let words: Vec<String> = keyword.split_whitespace().map(regex::escape).collect();
        format!(r"(?i)\b{}\b", words.join(r"\s+"))
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn classify(&self, name: &str, description: Option<&str>) -> Classification {
        let description = description.unwrap_or("");
        let hits: Vec<RuleHit<'_>> = self
            .rules
            .iter()
            .filter_map(|rule| self.match_rule(rule, name, description))
            .collect();

        if hits.is_empty() {
            return Classification::fallback();
        }

        let category_hit = Self::pick(hits.iter().filter(|h| h.rule.category.is_some()));
        let condition_hit = Self::pick(hits.iter().filter(|h| h.rule.condition.is_some()));

        let confidence = if category_hit.is_some() {
            let category_hits: Vec<&RuleHit<'_>> = hits
                .iter()
                .filter(|h| h.rule.category.is_some())
                .collect();
            let distinct: BTreeSet<&str> = category_hits
                .iter()
                .flat_map(|h| h.keywords.iter().map(|k| k.as_str()))
                .collect();
            let in_name = category_hits.iter().any(|h| h.in_name);
            Self::confidence(distinct.len(), in_name)
        } else {
            0.0
        };

        Classification {
            category: category_hit
                .and_then(|h| h.rule.category)
                .unwrap_or_default(),
            condition: condition_hit
                .and_then(|h| h.rule.condition)
                .unwrap_or_default(),
            confidence,
            matched_rules: hits.iter().map(|h| h.rule.id.clone()).collect(),
        }
    }

    fn match_rule<'a>(
        &self,
        rule: &'a ClassificationRule,
        name: &str,
        description: &str,
    ) -> Option<RuleHit<'a>> {
        let mut hit = RuleHit {
            rule,
            longest: 0,
            keywords: Vec::new(),
            in_name: false,
        };

        for keyword in &rule.keywords {
            let key = keyword.trim().to_lowercase();
            let Some(regex) = self.compiled_keywords.get(&key) else {
                continue;
            };
            let in_name = regex.is_match(name);
            if in_name || regex.is_match(description) {
                hit.longest = hit.longest.max(key.chars().count());
                hit.in_name |= in_name;
                hit.keywords.push(key);
            }
        }

        (!hit.keywords.is_empty()).then_some(hit)
    }

    /// Longest matched keyword wins; on a tie the earlier rule in priority
    /// order keeps its place.
    fn pick<'h, 'a: 'h>(hits: impl Iterator<Item = &'h RuleHit<'a>>) -> Option<&'h RuleHit<'a>> {
        let mut best: Option<&RuleHit<'a>> = None;
        for hit in hits {
            match best {
                Some(current) if current.longest >= hit.longest => {}
                _ => best = Some(hit),
            }
        }
        best
    }

    fn confidence(distinct_hits: usize, in_name: bool) -> f64 {
        let extra = distinct_hits.saturating_sub(1) as f64;
        let mut score = (BASE_CONFIDENCE + PER_EXTRA_HIT * extra).min(HIT_CEILING);
        if in_name {
            score += NAME_BONUS;
        }
        score.min(1.0)
    }
}
