//! Broad ↔ specific chapter taxonomy.
//!
//! Built once from configuration into a one-level adjacency map. Expansion
//! copies each broad estimate onto its missing specific chapters; since no
//! specific chapter may itself be broad, derived entries are never expanded
//! again and a second pass changes nothing.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::irt::error::TaxonomyError;
use crate::irt::types::{AbilityRecord, AbilitySnapshot, ChapterTaxonomyEntry, DerivedFrom};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonomyMapping {
    pub specific: Vec<String>,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChapterTaxonomy {
    broad: BTreeMap<String, TaxonomyMapping>,
    parents: BTreeMap<String, String>,
}

impl ChapterTaxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[ChapterTaxonomyEntry]) -> Result<Self, TaxonomyError> {
        let broad_keys: BTreeSet<&str> = entries.iter().map(|e| e.broad_key.as_str()).collect();
        let mut broad = BTreeMap::new();
        let mut parents = BTreeMap::new();

        for entry in entries {
            if broad.contains_key(&entry.broad_key) {
                return Err(TaxonomyError::DuplicateBroad(entry.broad_key.clone()));
            }
            if !entry.weight.is_finite() || entry.weight <= 0.0 {
                return Err(TaxonomyError::InvalidWeight {
                    broad: entry.broad_key.clone(),
                    weight: entry.weight,
                });
            }

            let mut specific: Vec<String> = Vec::with_capacity(entry.specific_keys.len());
            for key in &entry.specific_keys {
                if *key == entry.broad_key {
                    return Err(TaxonomyError::SelfReference(entry.broad_key.clone()));
                }
                if broad_keys.contains(key.as_str()) {
                    return Err(TaxonomyError::NestedBroad {
                        broad: entry.broad_key.clone(),
                        specific: key.clone(),
                    });
                }
                if !specific.contains(key) {
                    specific.push(key.clone());
                }
                // Lexicographically first broad parent wins for shared specifics.
                let parent = parents.entry(key.clone()).or_insert_with(|| entry.broad_key.clone());
                if entry.broad_key < *parent {
                    *parent = entry.broad_key.clone();
                }
            }

            broad.insert(
                entry.broad_key.clone(),
                TaxonomyMapping {
                    specific,
                    weight: entry.weight,
                },
            );
        }

        Ok(Self { broad, parents })
    }

    pub fn is_broad_chapter(&self, key: &str) -> bool {
        self.broad.contains_key(key)
    }

    pub fn get_specific_chapters(&self, broad_key: &str) -> &[String] {
        self.broad
            .get(broad_key)
            .map(|m| m.specific.as_slice())
            .unwrap_or(&[])
    }

    pub fn broad_of(&self, specific_key: &str) -> Option<&str> {
        self.parents.get(specific_key).map(String::as_str)
    }

    pub fn mapping_weight(&self, broad_key: &str) -> Option<f64> {
        self.broad.get(broad_key).map(|m| m.weight)
    }

    pub fn len(&self) -> usize {
        self.broad.len()
    }

    pub fn is_empty(&self) -> bool {
        self.broad.is_empty()
    }

    /// Broad entries stay for provenance but are never scheduled.
    pub fn is_schedulable(&self, key: &str) -> bool {
        !self.is_broad_chapter(key)
    }

    pub fn expand_broad_chapters(&self, estimates: &AbilitySnapshot) -> AbilitySnapshot {
        let mut expanded = estimates.clone();
        let mut inserted = 0usize;
        let mut already_derived = 0usize;

        for (broad_key, mapping) in &self.broad {
            let Some(source) = estimates.get(broad_key) else {
                continue;
            };
            for specific in &mapping.specific {
                match expanded.get(specific) {
                    Some(existing) => {
                        if existing.is_derived() {
                            already_derived += 1;
                        }
                    }
                    None => {
                        expanded.insert(specific.clone(), derive(source, specific, broad_key, mapping.weight));
                        inserted += 1;
                    }
                }
            }
        }

        if inserted == 0 && already_derived > 0 {
            tracing::debug!(
                derived = already_derived,
                "taxonomy expansion on an already expanded snapshot, nothing to do"
            );
        } else if inserted > 0 {
            tracing::debug!(inserted, "synthesized specific chapter estimates");
        }

        expanded
    }
}

fn derive(source: &AbilityRecord, specific: &str, broad_key: &str, weight: f64) -> AbilityRecord {
    AbilityRecord {
        key: specific.to_string(),
        theta: source.theta,
        standard_error: source.standard_error,
        attempts: 0,
        correct_count: 0,
        derived_from: Some(DerivedFrom {
            broad_key: broad_key.to_string(),
            weight,
        }),
        last_attempt_at: source.last_attempt_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(broad: &str, specific: &[&str]) -> ChapterTaxonomyEntry {
        ChapterTaxonomyEntry {
            broad_key: broad.into(),
            specific_keys: specific.iter().map(|s| s.to_string()).collect(),
            weight: 1.0,
        }
    }

    fn taxonomy() -> ChapterTaxonomy {
        ChapterTaxonomy::from_entries(&[
            entry("mechanics", &["kinematics", "laws_of_motion", "work_energy"]),
            entry("optics", &["ray_optics", "wave_optics"]),
        ])
        .unwrap()
    }

    fn attempted(key: &str, theta: f64) -> AbilityRecord {
        AbilityRecord {
            attempts: 3,
            correct_count: 2,
            ..AbilityRecord::new(key, theta, 0.45)
        }
    }

    #[test]
    fn test_query_primitives() {
        let tax = taxonomy();
        assert!(tax.is_broad_chapter("mechanics"));
        assert!(!tax.is_broad_chapter("kinematics"));
        assert_eq!(tax.get_specific_chapters("optics"), ["ray_optics", "wave_optics"]);
        assert!(tax.get_specific_chapters("unknown").is_empty());
        assert_eq!(tax.broad_of("work_energy"), Some("mechanics"));
        assert_eq!(tax.mapping_weight("optics"), Some(1.0));
        assert_eq!(tax.mapping_weight("kinematics"), None);
    }

    #[test]
    fn test_expansion_fills_missing_specifics() {
        let tax = taxonomy();
        let mut snapshot = AbilitySnapshot::new();
        snapshot.insert("mechanics".into(), attempted("mechanics", 0.8));
        snapshot.insert("kinematics".into(), attempted("kinematics", -0.2));

        let expanded = tax.expand_broad_chapters(&snapshot);
        assert_eq!(expanded.len(), 4);
        assert!((expanded["kinematics"].theta + 0.2).abs() < 1e-12);
        assert!(!expanded["kinematics"].is_derived());

        let derived = &expanded["laws_of_motion"];
        assert!((derived.theta - 0.8).abs() < 1e-12);
        assert!((derived.standard_error - 0.45).abs() < 1e-12);
        assert_eq!(derived.derived_from.as_ref().unwrap().broad_key, "mechanics");
        assert!(expanded.contains_key("mechanics"));
        assert!(!expanded.contains_key("ray_optics"));
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let tax = taxonomy();
        let mut snapshot = AbilitySnapshot::new();
        snapshot.insert("mechanics".into(), attempted("mechanics", 0.8));
        snapshot.insert("optics".into(), attempted("optics", -1.1));
        let once = tax.expand_broad_chapters(&snapshot);
        let twice = tax.expand_broad_chapters(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_nested_broad_rejected() {
        let result = ChapterTaxonomy::from_entries(&[
            entry("physics", &["mechanics"]),
            entry("mechanics", &["kinematics"]),
        ]);
        assert!(matches!(result, Err(TaxonomyError::NestedBroad { .. })));
    }

    #[test]
    fn test_self_reference_and_duplicate_rejected() {
        assert!(matches!(
            ChapterTaxonomy::from_entries(&[entry("mechanics", &["mechanics"])]),
            Err(TaxonomyError::SelfReference(_))
        ));
        assert!(matches!(
            ChapterTaxonomy::from_entries(&[entry("mechanics", &["a"]), entry("mechanics", &["b"])]),
            Err(TaxonomyError::DuplicateBroad(_))
        ));
    }

    #[test]
    fn test_broad_not_schedulable() {
        let tax = taxonomy();
        assert!(!tax.is_schedulable("mechanics"));
        assert!(tax.is_schedulable("kinematics"));
    }
}
