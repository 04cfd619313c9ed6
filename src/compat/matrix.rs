use crate::core::config::CompatibilityRule;
use crate::core::errors::{ModlinkError, Result};
use crate::registry::Category;
use std::collections::HashMap;

pub const FULL: f64 = 1.0;
pub const HIGH: f64 = 0.8;
pub const MEDIUM: f64 = 0.6;
pub const LOW: f64 = 0.4;
pub const INCOMPATIBLE: f64 = 0.0;

use Category::*;

/// Cross-category base scores. Same-category pairs are handled separately.
const DEFAULT_RULES: &[(Category, Category, f64)] = &[
    (Core, Security, HIGH),
    (Core, Performance, HIGH),
    (Core, Integration, HIGH),
    (Core, Language, HIGH),
    (Core, Framework, HIGH),
    (Core, Experimental, MEDIUM),
    (Security, Performance, MEDIUM),
    (Security, Integration, MEDIUM),
    (Security, Language, HIGH),
    (Security, Framework, MEDIUM),
    (Security, Experimental, LOW),
    (Performance, Integration, MEDIUM),
    (Performance, Language, HIGH),
    (Performance, Framework, HIGH),
    (Performance, Experimental, MEDIUM),
    (Integration, Language, MEDIUM),
    (Integration, Framework, HIGH),
    (Integration, Experimental, LOW),
    (Language, Framework, HIGH),
    (Language, Experimental, MEDIUM),
    (Framework, Experimental, LOW),
];

/// Symmetric category-pair table of base scores
#[derive(Debug, Clone, PartialEq)]
pub struct CompatibilityMatrix {
    scores: HashMap<(Category, Category), f64>,
}

fn key(a: Category, b: Category) -> (Category, Category) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Default for CompatibilityMatrix {
    fn default() -> Self {
        let mut matrix = Self::empty();
        for category in Category::ALL {
            let score = if category == Experimental { MEDIUM } else { FULL };
            matrix.scores.insert(key(category, category), score);
        }
        for (a, b, score) in DEFAULT_RULES {
            matrix.scores.insert(key(*a, *b), *score);
        }
        matrix
    }
}

impl CompatibilityMatrix {
    /// Matrix without any rules; every pair is missing
    pub fn empty() -> Self {
        Self {
            scores: HashMap::new(),
        }
    }

    /// Default table with configured overrides applied on top
    pub fn with_rules(rules: &[CompatibilityRule]) -> Result<Self> {
        let mut matrix = Self::default();
        for rule in rules {
            matrix.set(rule.a, rule.b, rule.score)?;
        }
        Ok(matrix)
    }

    pub fn set(&mut self, a: Category, b: Category, score: f64) -> Result<()> {
        if !(INCOMPATIBLE..=FULL).contains(&score) {
            return Err(ModlinkError::validation_field(
                format!("base score for ({}, {}) out of range: {}", a, b, score),
                "compatibility.score",
            ));
        }
        self.scores.insert(key(a, b), score);
        Ok(())
    }

    pub fn get(&self, a: Category, b: Category) -> Option<f64> {
        self.scores.get(&key(a, b)).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_covers_every_pair_symmetrically() {
        let matrix = CompatibilityMatrix::default();
        // 7 diagonal + 21 off-diagonal pairs
        assert_eq!(matrix.len(), 28);
        for a in Category::ALL {
            for b in Category::ALL {
                assert_eq!(matrix.get(a, b), matrix.get(b, a));
                assert!(matrix.get(a, b).is_some(), "missing ({a}, {b})");
            }
        }
        assert_eq!(matrix.get(Security, Security), Some(FULL));
        assert_eq!(matrix.get(Experimental, Security), Some(LOW));
        assert_eq!(matrix.get(Experimental, Experimental), Some(MEDIUM));
    }

    #[test]
    fn test_overrides() {
        let rules = vec![CompatibilityRule {
            a: Experimental,
            b: Core,
            score: 0.0,
        }];
        let matrix = CompatibilityMatrix::with_rules(&rules).unwrap();
        assert_eq!(matrix.get(Core, Experimental), Some(INCOMPATIBLE));

        let mut matrix = CompatibilityMatrix::empty();
        assert!(matrix.set(Core, Core, 1.2).is_err());
        assert_eq!(matrix.get(Core, Core), None);
    }
}
