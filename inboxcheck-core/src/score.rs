//! Deliverability score helpers.
//!
//! The service's `deliverabilityScore` is authoritative. When a payload
//! omits it, the score falls back to the share of test inboxes where the
//! email landed in the primary inbox.

use serde::{Deserialize, Deserializer};

use crate::types::{Folder, PlacementResult};

/// `round(100 * inbox / total)`, or `0` when there are no results.
pub fn fallback_score(results: &[PlacementResult]) -> u8 {
    let total = results.len();
    if total == 0 {
        return 0;
    }
    let inbox = results.iter().filter(|r| r.folder == Folder::Inbox).count();
    ((inbox as f64 * 100.0) / total as f64).round() as u8
}

/// Use the authoritative score when present; never override it.
pub fn resolve_score(authoritative: Option<u8>, results: &[PlacementResult]) -> u8 {
    authoritative.unwrap_or_else(|| fallback_score(results))
}

/// Score quality bands used when rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    Good,
    Fair,
    Poor,
}

impl ScoreBand {
    pub fn of(score: u8) -> Self {
        match score {
            80.. => ScoreBand::Good,
            50..80 => ScoreBand::Fair,
            _ => ScoreBand::Poor,
        }
    }
}

impl std::fmt::Display for ScoreBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreBand::Good => write!(f, "good"),
            ScoreBand::Fair => write!(f, "fair"),
            ScoreBand::Poor => write!(f, "poor"),
        }
    }
}

/// Per-folder counts over a set of placement results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlacementTally {
    pub inbox: usize,
    pub spam: usize,
    pub promotions: usize,
    pub not_received: usize,
}

impl PlacementTally {
    pub fn from_results(results: &[PlacementResult]) -> Self {
        results.iter().fold(Self::default(), |mut tally, r| {
            match r.folder {
                Folder::Inbox => tally.inbox += 1,
                Folder::Spam => tally.spam += 1,
                Folder::Promotions => tally.promotions += 1,
                Folder::NotReceived => tally.not_received += 1,
            }
            tally
        })
    }

    pub fn total(&self) -> usize {
        self.inbox + self.spam + self.promotions + self.not_received
    }

    pub fn get(&self, folder: Folder) -> usize {
        match folder {
            Folder::Inbox => self.inbox,
            Folder::Spam => self.spam,
            Folder::Promotions => self.promotions,
            Folder::NotReceived => self.not_received,
        }
    }
}

fn check_score<E: serde::de::Error>(raw: f64) -> Result<u8, E> {
    if !raw.is_finite() || !(0.0..=100.0).contains(&raw) {
        return Err(E::custom(format!(
            "deliverabilityScore {raw} is outside 0..=100"
        )));
    }
    Ok(raw.round() as u8)
}

/// Deserialize a percentage that may arrive as an integer or a float.
pub(crate) fn deserialize_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    check_score(f64::deserialize(deserializer)?)
}

/// Like [`deserialize_score`], with `null` mapping to `None`.
pub(crate) fn deserialize_opt_score<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer)?
        .map(check_score)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TestResults;

    fn placement(folder: Folder) -> PlacementResult {
        PlacementResult {
            email: "inbox@test.dev".into(),
            folder,
            received_at: None,
            subject: None,
            provider: None,
            inbox_name: None,
        }
    }

    #[test]
    fn test_fallback_score_mixed_folders() {
        let results = vec![
            placement(Folder::Inbox),
            placement(Folder::Spam),
            placement(Folder::Inbox),
            placement(Folder::Promotions),
        ];
        assert_eq!(fallback_score(&results), 50);
    }

    #[test]
    fn test_fallback_score_empty_is_zero() {
        assert_eq!(fallback_score(&[]), 0);
    }

    #[test]
    fn test_fallback_score_rounds() {
        let results = vec![
            placement(Folder::Inbox),
            placement(Folder::Inbox),
            placement(Folder::Spam),
        ];
        assert_eq!(fallback_score(&results), 67);
    }

    #[test]
    fn test_resolve_score_prefers_authoritative() {
        let results = vec![placement(Folder::Spam), placement(Folder::Spam)];
        assert_eq!(resolve_score(Some(90), &results), 90);
        assert_eq!(resolve_score(None, &results), 0);
    }

    #[test]
    fn test_score_band() {
        assert_eq!(ScoreBand::of(100), ScoreBand::Good);
        assert_eq!(ScoreBand::of(80), ScoreBand::Good);
        assert_eq!(ScoreBand::of(79), ScoreBand::Fair);
        assert_eq!(ScoreBand::of(50), ScoreBand::Fair);
        assert_eq!(ScoreBand::of(49), ScoreBand::Poor);
    }

    #[test]
    fn test_tally() {
        let results = vec![
            placement(Folder::Inbox),
            placement(Folder::NotReceived),
            placement(Folder::Inbox),
        ];
        let tally = PlacementTally::from_results(&results);
        assert_eq!(tally.inbox, 2);
        assert_eq!(tally.get(Folder::NotReceived), 1);
        assert_eq!(tally.total(), 3);
    }

    #[test]
    fn test_score_deserialization_bounds() {
        let ok: TestResults =
            serde_json::from_str(r#"{"deliverabilityScore": 66.7, "results": []}"#).unwrap();
        assert_eq!(ok.deliverability_score, Some(67));

        let null: TestResults =
            serde_json::from_str(r#"{"deliverabilityScore": null, "results": []}"#).unwrap();
        assert_eq!(null.deliverability_score, None);

        let bad = serde_json::from_str::<TestResults>(r#"{"deliverabilityScore": 140, "results": []}"#);
        assert!(bad.is_err());
    }
}
