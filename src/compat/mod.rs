//! Compatibility Validator
//!
//! Deterministic pairwise scoring: a category-pair base score from the
//! [`CompatibilityMatrix`] minus penalties for overlapping exclusive
//! capabilities, conflicting pinned dependency versions and a format major
//! version mismatch. Scores are advisory and never block loading.

mod matrix;

pub use matrix::CompatibilityMatrix;

use crate::registry::{Category, Module, ModuleId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

pub const CAPABILITY_OVERLAP_PENALTY: f64 = 0.2;
pub const DEPENDENCY_CONFLICT_PENALTY: f64 = 0.3;
pub const FORMAT_MISMATCH_PENALTY: f64 = 0.1;

/// Scores are kept to six decimal places
const SCORE_SCALE: f64 = 1e6;
const ANY_VERSION: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatLevel {
    Incompatible,
    Low,
    Medium,
    High,
    Full,
}

impl CompatLevel {
    /// Tier whose boundary is nearest at or below `score`.
    /// Only exactly 1.0 is `Full` and only exactly 0.0 is `Incompatible`.
    pub fn from_score(score: f64) -> Self {
        let score = snap(score);
        if score >= matrix::FULL {
            CompatLevel::Full
        } else if score >= matrix::HIGH {
            CompatLevel::High
        } else if score >= matrix::MEDIUM {
            CompatLevel::Medium
        } else if score > matrix::INCOMPATIBLE {
            CompatLevel::Low
        } else {
            CompatLevel::Incompatible
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompatLevel::Incompatible => "incompatible",
            CompatLevel::Low => "low",
            CompatLevel::Medium => "medium",
            CompatLevel::High => "high",
            CompatLevel::Full => "full",
        }
    }
}

impl fmt::Display for CompatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule that contributed to a score, in evaluation order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Reason {
    CategoryRule {
        a: Category,
        b: Category,
        base: f64,
    },
    MissingCategoryRule {
        a: Category,
        b: Category,
    },
    CapabilityOverlap {
        tags: Vec<String>,
        penalty: f64,
    },
    DependencyConflict {
        conflicts: Vec<VersionConflict>,
        penalty: f64,
    },
    FormatMismatch {
        a_version: String,
        b_version: String,
        penalty: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConflict {
    pub dependency: ModuleId,
    pub a_version: String,
    pub b_version: String,
}

/// Score for an unordered module pair; `module_a <= module_b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityRecord {
    pub module_a: ModuleId,
    pub module_b: ModuleId,
    pub score: f64,
    pub level: CompatLevel,
    pub basis: Vec<Reason>,
}

impl CompatibilityRecord {
    pub fn is_incompatible(&self) -> bool {
        self.level == CompatLevel::Incompatible
    }

    pub fn involves(&self, id: &str) -> bool {
        self.module_a == id || self.module_b == id
    }
}

/// Pure scorer over a fixed matrix
#[derive(Debug, Clone, Default)]
pub struct CompatibilityValidator {
    matrix: CompatibilityMatrix,
}

impl CompatibilityValidator {
    pub fn new(matrix: CompatibilityMatrix) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &CompatibilityMatrix {
        &self.matrix
    }

    /// Score a pair. `score(a, b)` and `score(b, a)` return identical records.
    pub fn score(&self, a: &Module, b: &Module) -> CompatibilityRecord {
        let (a, b) = if a.id <= b.id { (a, b) } else { (b, a) };
        let mut basis = Vec::new();

        let mut score = match self.matrix.get(a.category, b.category) {
            Some(base) => {
                basis.push(Reason::CategoryRule {
                    a: a.category,
                    b: b.category,
                    base,
                });
                base
            }
            None => {
                warn!(
                    "No compatibility rule for ({}, {}); scoring {} x {} as incompatible",
                    a.category, b.category, a.id, b.id
                );
                basis.push(Reason::MissingCategoryRule {
                    a: a.category,
                    b: b.category,
                });
                matrix::INCOMPATIBLE
            }
        };

        let tags: Vec<String> = a
            .exclusive_capabilities
            .intersection(&b.exclusive_capabilities)
            .cloned()
            .collect();
        if !tags.is_empty() {
            score -= CAPABILITY_OVERLAP_PENALTY;
            basis.push(Reason::CapabilityOverlap {
                tags,
                penalty: CAPABILITY_OVERLAP_PENALTY,
            });
        }

        let conflicts = version_conflicts(a, b);
        if !conflicts.is_empty() {
            score -= DEPENDENCY_CONFLICT_PENALTY;
            basis.push(Reason::DependencyConflict {
                conflicts,
                penalty: DEPENDENCY_CONFLICT_PENALTY,
            });
        }

        if let (Some(major_a), Some(major_b)) = (a.format_major(), b.format_major()) {
            if major_a != major_b {
                score -= FORMAT_MISMATCH_PENALTY;
                basis.push(Reason::FormatMismatch {
                    a_version: a.format_version.clone(),
                    b_version: b.format_version.clone(),
                    penalty: FORMAT_MISMATCH_PENALTY,
                });
            }
        }

        // Penalty arithmetic leaves float residue such as 0.4 - 0.3 - 0.1 > 0
        let score = snap(score.clamp(matrix::INCOMPATIBLE, matrix::FULL));
        let level = CompatLevel::from_score(score);
        debug!("Scored {} x {}: {:.3} ({})", a.id, b.id, score, level);

        CompatibilityRecord {
            module_a: a.id.clone(),
            module_b: b.id.clone(),
            score,
            level,
            basis,
        }
    }

    /// Score every unordered pair, ordered by `(module_a, module_b)`
    pub fn score_all<'a, I>(&self, modules: I) -> Vec<CompatibilityRecord>
    where
        I: IntoIterator<Item = &'a Module>,
    {
        let mut modules: Vec<&Module> = modules.into_iter().collect();
        modules.sort_by(|x, y| x.id.cmp(&y.id));
        modules.dedup_by(|x, y| x.id == y.id);

        let mut records = Vec::new();
        for (i, a) in modules.iter().enumerate() {
            for b in &modules[i + 1..] {
                records.push(self.score(a, b));
            }
        }
        records
    }
}

fn snap(score: f64) -> f64 {
    (score * SCORE_SCALE).round() / SCORE_SCALE
}

/// Shared dependencies pinned to different versions by the two modules
fn version_conflicts(a: &Module, b: &Module) -> Vec<VersionConflict> {
    a.dependency_versions
        .iter()
        .filter_map(|(dep, a_version)| {
            let b_version = b.dependency_versions.get(dep)?;
            let compatible =
                a_version == ANY_VERSION || b_version == ANY_VERSION || a_version == b_version;
            (!compatible).then(|| VersionConflict {
                dependency: dep.clone(),
                a_version: a_version.clone(),
                b_version: b_version.clone(),
            })
        })
        .collect()
}
