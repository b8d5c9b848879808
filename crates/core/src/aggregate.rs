use std::collections::HashSet;

use crate::models::{truncate_title, ActivityCard, PriceTier, SearchHit};
use crate::text::contains_any;

const WHEELCHAIR_MARKERS: [&str; 3] = ["wheelchair accessible", "step-free", "accessible entrance"];
const CHILD_MARKERS: [&str; 3] = ["kids", "family-friendly", "children"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessibilityFlags {
    pub wheelchair_friendly: bool,
    pub child_friendly: bool,
}

/// Keyword scan of a hit's content. A miss reads as `false`, not unknown.
pub fn infer_flags(content: Option<&str>) -> AccessibilityFlags {
    let lower = content.unwrap_or_default().to_lowercase();
    AccessibilityFlags {
        wheelchair_friendly: contains_any(&lower, &WHEELCHAIR_MARKERS),
        child_friendly: contains_any(&lower, &CHILD_MARKERS),
    }
}

pub fn price_tier_from_text(content: Option<&str>) -> Option<PriceTier> {
    let lower = content?.to_lowercase();
    if contains_any(&lower, &["$$$", "expensive"]) {
        Some(PriceTier::Expensive)
    } else if contains_any(&lower, &["$$", "moderate"]) {
        Some(PriceTier::Moderate)
    } else if contains_any(&lower, &["$", "cheap", "budget"]) {
        Some(PriceTier::Budget)
    } else {
        None
    }
}

/// Turns raw hits into at most `limit` cards, keeping the first hit for each
/// exact (case-sensitive) title.
pub fn normalize_hits(hits: &[SearchHit], limit: usize) -> Vec<ActivityCard> {
    let mut cards = Vec::new();
    let mut seen = HashSet::new();

    for hit in hits {
        if cards.len() >= limit {
            break;
        }
        let title = hit.title.as_deref().unwrap_or_default().trim();
        if title.is_empty() || !seen.insert(title.to_string()) {
            continue;
        }

        let content = hit.content.as_deref();
        let flags = infer_flags(content);
        cards.push(ActivityCard {
            title: truncate_title(title),
            url: hit.url.clone(),
            price_tier: price_tier_from_text(content),
            wheelchair_friendly: Some(flags.wheelchair_friendly),
            child_friendly: Some(flags.child_friendly),
            ..ActivityCard::default()
        });
    }

    cards
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, content: &str) -> SearchHit {
        SearchHit::new(title, Some(format!("https://example.com/{}", title.len())), content)
    }

    #[test]
    fn keeps_first_of_duplicate_titles() {
        let hits = vec![
            hit("Louvre", "first"),
            hit("Louvre", "second, kids welcome"),
            hit("louvre", "different case"),
        ];
        let cards = normalize_hits(&hits, 5);

        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].title, "Louvre");
        assert_eq!(cards[0].child_friendly, Some(false));
        assert_eq!(cards[1].title, "louvre");
    }

    #[test]
    fn skips_empty_titles_and_stops_at_limit() {
        let hits = vec![
            SearchHit {
                title: None,
                url: None,
                content: None,
            },
            hit("   ", "blank"),
            hit("A", ""),
            hit("B", ""),
            hit("C", ""),
        ];
        let cards = normalize_hits(&hits, 2);
        let titles = cards.iter().map(|card| card.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[test]
    fn flags_come_from_lowercased_content() {
        let flags = infer_flags(Some("Step-Free access and Family-Friendly shows"));
        assert!(flags.wheelchair_friendly);
        assert!(flags.child_friendly);

        let flags = infer_flags(None);
        assert!(!flags.wheelchair_friendly);
        assert!(!flags.child_friendly);
    }

    #[test]
    fn price_tier_priority_is_most_expensive_first() {
        assert_eq!(price_tier_from_text(Some("cheap eats, $$$ tasting menu")), Some(PriceTier::Expensive));
        assert_eq!(price_tier_from_text(Some("Moderate prices")), Some(PriceTier::Moderate));
        assert_eq!(price_tier_from_text(Some("from $5")), Some(PriceTier::Budget));
        assert_eq!(price_tier_from_text(Some("free entry")), None);
        assert_eq!(price_tier_from_text(None), None);
    }

    #[test]
    fn truncates_long_titles() {
        let long = "x".repeat(200);
        let cards = normalize_hits(&[hit(&long, "")], 3);
        assert_eq!(cards[0].title.chars().count(), 120);
        assert!(cards[0].tags.is_empty());
        assert!(cards[0].duration_min.is_none());
    }
}
