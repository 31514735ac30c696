use std::collections::HashMap;
use tracing::{debug, info};

use crate::models::{Opportunity, ScoringResult};

/// Overall score adjusted for confidence, transition fit and red flags.
pub fn rank_key(result: &ScoringResult) -> f64 {
    let mut key = result.overall_score;
    if result.confidence > 0.8 && result.technical_score >= 7.0 {
        key += 0.5;
    }
    if result.transition_score >= 8.0 {
        key += 0.3;
    }
    key - 0.2 * result.red_flags.len() as f64
}

/// Best first. Ties go to the more recently discovered posting, then to id order.
pub fn rank(
    mut pairs: Vec<(Opportunity, ScoringResult)>,
) -> Vec<(Opportunity, ScoringResult)> {
    pairs.sort_by(|(a_opp, a_res), (b_opp, b_res)| {
        rank_key(b_res)
            .total_cmp(&rank_key(a_res))
            .then_with(|| b_opp.discovered_at.cmp(&a_opp.discovered_at))
            .then_with(|| a_opp.id.cmp(&b_opp.id))
    });
    info!("Ranked {} opportunities", pairs.len());
    pairs
}

/// Collapses postings that share a canonical key, keeping the one from the
/// higher-priority source. Survivors keep the slot of the first sighting.
pub fn deduplicate(opportunities: Vec<Opportunity>) -> Vec<Opportunity> {
    let received = opportunities.len();
    let mut slots: Vec<Opportunity> = Vec::with_capacity(received);
    let mut index: HashMap<String, usize> = HashMap::new();

    for opp in opportunities {
        let key = opp.dedup_key();
        match index.get(&key).copied() {
            Some(slot) => {
                let kept = &slots[slot];
                if opp.source.priority() > kept.source.priority() {
                    debug!(
                        key = %key,
                        replaced = %kept.source,
                        by = %opp.source,
                        "Duplicate posting from higher-priority source"
                    );
                    slots[slot] = opp;
                } else {
                    debug!(key = %key, dropped = %opp.source, "Duplicate posting dropped");
                }
            }
            None => {
                index.insert(key, slots.len());
                slots.push(opp);
            }
        }
    }

    if slots.len() < received {
        info!(
            "Deduplicated {} postings down to {}",
            received,
            slots.len()
        );
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Recommendation, ScoringMethod, Source};
    use chrono::{Duration, Utc};

    fn result(overall: f64, red_flags: usize) -> ScoringResult {
        ScoringResult {
            overall_score: overall,
            confidence: 0.6,
            technical_score: 5.0,
            transition_score: 5.0,
            culture_score: 5.0,
            growth_score: 5.0,
            compensation_score: 5.0,
            reasoning: String::new(),
            recommendation: Recommendation::Research,
            keywords_matched: Vec::new(),
            red_flags: (0..red_flags).map(|i| format!("flag{}", i)).collect(),
            method: ScoringMethod::Heuristic,
        }
    }

    #[test]
    fn test_red_flags_break_a_tie() {
        let job_a = Opportunity::new("Job A", "Acme", Source::Indeed);
        let job_b = Opportunity::new("Job B", "Acme", Source::Indeed);
        let ranked = rank(vec![(job_a, result(7.0, 2)), (job_b, result(7.0, 0))]);
        assert_eq!(ranked[0].0.title, "Job B");
        assert_eq!(ranked[1].0.title, "Job A");
    }

    #[test]
    fn test_boosts_apply() {
        let mut confident = result(7.0, 0);
        confident.confidence = 0.9;
        confident.technical_score = 7.0;
        assert!((rank_key(&confident) - 7.5).abs() < 1e-9);

        let mut bridge = result(7.0, 0);
        bridge.transition_score = 8.0;
        assert!((rank_key(&bridge) - 7.3).abs() < 1e-9);

        let plain = Opportunity::new("Plain", "Acme", Source::Company);
        let boosted = Opportunity::new("Boosted", "Acme", Source::Company);
        let ranked = rank(vec![(plain, result(7.2, 0)), (boosted, bridge)]);
        assert_eq!(ranked[0].0.title, "Boosted");
    }

    #[test]
    fn test_equal_keys_prefer_newer_discovery() {
        let now = Utc::now();
        let old = Opportunity::new("Old", "Acme", Source::Company)
            .with_discovered_at(now - Duration::days(3));
        let new = Opportunity::new("New", "Acme", Source::Company).with_discovered_at(now);
        let ranked = rank(vec![(old, result(6.0, 0)), (new, result(6.0, 0))]);
        assert_eq!(ranked[0].0.title, "New");
    }

    #[test]
    fn test_linkedin_wins_over_indeed() {
        let indeed = Opportunity::new("ML Platform Engineer", "TechStart AI", Source::Indeed);
        let linkedin = Opportunity::new("ml platform engineer", "TechStart AI", Source::Linkedin);
        let kept = deduplicate(vec![indeed, linkedin]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source, Source::Linkedin);
    }

    #[test]
    fn test_equal_priority_keeps_first_seen_and_order() {
        let first = Opportunity::new("Data Engineer", "Acme", Source::Aggregator)
            .with_description("first");
        let other = Opportunity::new("Backend Engineer", "Globex", Source::Company);
        let second = Opportunity::new("Data Engineer", "ACME", Source::Other("hn".to_string()))
            .with_description("second");
        let better = Opportunity::new("Data Engineer", "Acme", Source::Indeed);

        let kept = deduplicate(vec![first, other, second, better]);
        assert_eq!(kept.len(), 2);
        // The indeed copy takes over the first slot; Globex stays second.
        assert_eq!(kept[0].source, Source::Indeed);
        assert_eq!(kept[1].company, "Globex");

        let a = Opportunity::new("Data Engineer", "Acme", Source::Aggregator).with_description("a");
        let b = Opportunity::new("Data Engineer", "Acme", Source::Aggregator).with_description("b");
        let kept = deduplicate(vec![a, b]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].description, "a");
    }
}
