use serde::Serialize;

use crate::models::{Dietary, Mobility, Preferences};
use crate::text::{contains_any, normalize_text};

const INTEREST_VOCABULARY: [&str; 11] = [
    "museums",
    "hikes",
    "beach",
    "nightlife",
    "shopping",
    "parks",
    "zoos",
    "aquariums",
    "art",
    "history",
    "food tours",
];

/// What the free-text notes asked for. `None` means the notes were silent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferredPreferences {
    pub dietary: Option<Dietary>,
    pub mobility_needs: Option<Mobility>,
    pub child_friendly: bool,
    pub interests: Vec<String>,
}

pub fn infer_from_free_text(free_text: &str) -> InferredPreferences {
    // Phrases like "no long hikes" must match across line breaks and doubled spaces.
    let lower = normalize_text(free_text).to_lowercase();
    if lower.is_empty() {
        return InferredPreferences::default();
    }

    let dietary = if lower.contains("vegan") {
        Some(Dietary::Vegan)
    } else if lower.contains("vegetarian") {
        Some(Dietary::Vegetarian)
    } else if lower.contains("gluten") {
        Some(Dietary::GlutenFree)
    } else {
        None
    };

    let mobility_needs = if lower.contains("wheelchair") {
        Some(Mobility::Wheelchair)
    } else if contains_any(&lower, &["no long hikes", "no hiking", "limited walk"]) {
        Some(Mobility::LimitedWalk)
    } else {
        None
    };

    InferredPreferences {
        dietary,
        mobility_needs,
        child_friendly: contains_any(&lower, &["kids", "children", "family"]),
        interests: INTEREST_VOCABULARY
            .iter()
            .filter(|keyword| lower.contains(*keyword))
            .map(|keyword| keyword.to_string())
            .collect(),
    }
}

/// Preferences the planner runs with, plus the child-friendly side channel
/// that only steers restaurant queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedPreferences {
    #[serde(flatten)]
    pub prefs: Preferences,
    pub child_friendly: bool,
}

/// Merges explicit preferences with what the notes imply. Anything the notes
/// mention replaces the explicit value, including the whole interest list.
pub fn merge_preferences(explicit: Option<&Preferences>, free_text: Option<&str>) -> ResolvedPreferences {
    let mut prefs = explicit.cloned().unwrap_or_default();
    let inferred = infer_from_free_text(free_text.unwrap_or_default());

    if let Some(dietary) = inferred.dietary {
        prefs.dietary = dietary;
    }
    if let Some(mobility) = inferred.mobility_needs {
        prefs.mobility_needs = mobility;
    }
    if !inferred.interests.is_empty() {
        prefs.interests = inferred.interests;
    }

    ResolvedPreferences {
        prefs,
        child_friendly: inferred.child_friendly,
    }
}
