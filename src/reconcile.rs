//! Re-points guideline rules at a freshly regenerated guideline table.
//!
//! Internal guideline ids are reassigned on every upstream export, so a rule
//! persisted against the previous generation is translated
//! `old id -> PharmGKB accession -> new id`. Rules whose guideline was retired
//! upstream are dropped. Every emitted rule references a guideline present in
//! the new generation.

use std::collections::HashMap;

use serde::Serialize;

use crate::domain::{GuidelineRecord, GuidelineRuleRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// The old guideline id is not in the previous generation's table.
    UnknownPreviousGuideline,
    /// The accession no longer exists in the new generation.
    RetiredGuideline,
}

/// A rule left behind by reconciliation. Expected churn, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationMiss {
    pub rule_id: i64,
    pub previous_guideline_id: i64,
    pub paid: Option<String>,
    pub reason: MissReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub rules: Vec<GuidelineRuleRecord>,
    pub misses: Vec<ReconciliationMiss>,
}

impl Reconciled {
    /// Nothing survived; callers load nothing new for the rule table.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Old internal id -> accession, built from a guideline generation.
pub fn accession_lookup(guidelines: &[GuidelineRecord]) -> HashMap<i64, String> {
    guidelines
        .iter()
        .map(|guideline| (guideline.id, guideline.paid.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct GuidelineReconciler {
    current: HashMap<String, i64>,
}

impl GuidelineReconciler {
    pub fn new(guidelines: &[GuidelineRecord]) -> Self {
        Self {
            current: guidelines
                .iter()
                .map(|guideline| (guideline.paid.clone(), guideline.id))
                .collect(),
        }
    }

    pub fn reconcile(
        &self,
        rules: &[GuidelineRuleRecord],
        previous: &HashMap<i64, String>,
    ) -> Reconciled {
        let mut reconciled = Reconciled::default();

        for rule in rules {
            let Some(paid) = previous.get(&rule.guideline_id) else {
                reconciled.misses.push(ReconciliationMiss {
                    rule_id: rule.id,
                    previous_guideline_id: rule.guideline_id,
                    paid: None,
                    reason: MissReason::UnknownPreviousGuideline,
                });
                continue;
            };
            let Some(&guideline_id) = self.current.get(paid) else {
                reconciled.misses.push(ReconciliationMiss {
                    rule_id: rule.id,
                    previous_guideline_id: rule.guideline_id,
                    paid: Some(paid.clone()),
                    reason: MissReason::RetiredGuideline,
                });
                continue;
            };

            reconciled.rules.push(GuidelineRuleRecord {
                id: reconciled.rules.len() as i64 + 1,
                guideline_id,
                ..rule.clone()
            });
        }

        reconciled
    }
}

pub fn reconcile(
    rules: &[GuidelineRuleRecord],
    previous: &HashMap<i64, String>,
    guidelines: &[GuidelineRecord],
) -> Reconciled {
    GuidelineReconciler::new(guidelines).reconcile(rules, previous)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::domain::GuidelineSource;

    fn guideline(id: i64, paid: &str) -> GuidelineRecord {
        GuidelineRecord {
            id,
            paid: paid.to_string(),
            source: GuidelineSource::Cpic,
            title: String::new(),
            summary: String::new(),
            recommendation: String::new(),
            gene: String::new(),
            drug: String::new(),
            phenotype: String::new(),
            genotype: String::new(),
            alternate: false,
            dosing: false,
        }
    }

    fn rule(id: i64, guideline_id: i64) -> GuidelineRuleRecord {
        GuidelineRuleRecord {
            id,
            gene: "CYP2C19".to_string(),
            variant: "rs4244285".to_string(),
            allele1: "G".to_string(),
            allele2: "A".to_string(),
            phenotype: format!("phenotype-{id}"),
            caid: "1449309937".to_string(),
            guideline_id,
        }
    }

    #[test]
    fn rule_follows_accession_across_generations() {
        let gen1 = vec![guideline(1, "PA001"), guideline(2, "PA002")];
        let gen2 = vec![guideline(1, "PA002"), guideline(2, "PA003")];
        let rules = vec![rule(1, 2)];

        let result = reconcile(&rules, &accession_lookup(&gen1), &gen2);
        assert_eq!(result.rules.len(), 1);
        assert_eq!(result.rules[0].guideline_id, 1);
        assert_eq!(result.rules[0].phenotype, "phenotype-1");
        assert!(result.misses.is_empty());
    }

    #[test]
    fn retired_guideline_drops_rule_and_renumbers() {
        let gen1 = vec![guideline(1, "PA001"), guideline(2, "PA002")];
        let gen2 = vec![guideline(1, "PA002"), guideline(2, "PA003")];
        let rules = vec![rule(1, 1), rule(2, 2), rule(3, 2)];

        let result = reconcile(&rules, &accession_lookup(&gen1), &gen2);
        let ids: Vec<_> = result.rules.iter().map(|r| (r.id, r.guideline_id)).collect();
        assert_eq!(ids, vec![(1, 1), (2, 1)]);
        assert_eq!(result.rules[0].phenotype, "phenotype-2");
        assert_eq!(result.misses.len(), 1);
        assert_eq!(result.misses[0].reason, MissReason::RetiredGuideline);
        assert_eq!(result.misses[0].paid.as_deref(), Some("PA001"));
    }

    #[test]
    fn unknown_previous_id_is_a_miss() {
        let gen1 = vec![guideline(1, "PA001")];
        let result = reconcile(&[rule(1, 9)], &accession_lookup(&gen1), &gen1);
        assert!(result.is_empty());
        assert_eq!(result.misses[0].reason, MissReason::UnknownPreviousGuideline);
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        let gen1 = vec![guideline(1, "PA001")];
        assert!(reconcile(&[], &accession_lookup(&gen1), &gen1).is_empty());
        assert!(reconcile(&[rule(1, 1)], &HashMap::new(), &gen1).is_empty());
        assert!(reconcile(&[rule(1, 1)], &accession_lookup(&gen1), &[]).is_empty());
    }

    #[test]
    fn same_generation_is_identity() {
        let generation = vec![guideline(1, "PA001"), guideline(2, "PA002"), guideline(3, "PA003")];
        let rules = vec![rule(1, 3), rule(2, 1), rule(3, 3), rule(4, 2)];

        let once = reconcile(&rules, &accession_lookup(&generation), &generation);
        assert_eq!(once.rules, rules);
        let twice = reconcile(&once.rules, &accession_lookup(&generation), &generation);
        assert_eq!(twice, once);
    }

    #[test]
    fn no_dangling_references_under_churn() {
        let paids: Vec<String> = (0..8).map(|n| format!("PA{n:03}")).collect();
        for shift in 0..4usize {
            let old: Vec<_> = paids[..6]
                .iter()
                .enumerate()
                .map(|(i, paid)| guideline(i as i64 + 1, paid))
                .collect();
            let new: Vec<_> = paids[shift..]
                .iter()
                .rev()
                .enumerate()
                .map(|(i, paid)| guideline(i as i64 + 1, paid))
                .collect();
            let rules: Vec<_> = (1..=12).map(|n| rule(n, (n % 7) + 1)).collect();

            let lookup = accession_lookup(&old);
            let result = reconcile(&rules, &lookup, &new);

            let new_ids: HashSet<_> = new.iter().map(|g| g.id).collect();
            assert!(result.rules.iter().all(|r| new_ids.contains(&r.guideline_id)));

            let new_paids: HashSet<_> = new.iter().map(|g| g.paid.as_str()).collect();
            let reachable = rules
                .iter()
                .filter(|r| {
                    lookup
                        .get(&r.guideline_id)
                        .is_some_and(|paid| new_paids.contains(paid.as_str()))
                })
                .count();
            assert!(result.rules.len() <= reachable);
            assert_eq!(result.rules.len() + result.misses.len(), rules.len());
        }
    }
}
