use crate::models::{Dietary, Preferences, TimeBlock};

pub const MAX_QUERIES_PER_BLOCK: usize = 6;

/// Search queries for one time block: block seeds first, then one per interest
/// in the order given, then a dietary restaurant query for afternoon and
/// evening. Anything past [`MAX_QUERIES_PER_BLOCK`] is dropped.
pub fn build_block_queries(location: &str, prefs: &Preferences, block: TimeBlock) -> Vec<String> {
    let mut queries = match block {
        TimeBlock::Morning => vec![format!("best morning activities {location}")],
        TimeBlock::Afternoon => vec![format!("top attractions {location}")],
        TimeBlock::Evening => vec![
            format!("evening things to do {location}"),
            format!("events tonight {location}"),
        ],
    };

    queries.extend(
        prefs
            .interests
            .iter()
            .map(|interest| format!("{interest} {location}")),
    );

    if block != TimeBlock::Morning && prefs.dietary.is_restricted() {
        queries.push(format!("{} restaurants {location}", prefs.dietary.as_str()));
    }

    queries.truncate(MAX_QUERIES_PER_BLOCK);
    queries
}

pub fn build_restaurant_queries(location: &str, dietary: Dietary, child_friendly: bool) -> Vec<String> {
    let primary = if dietary.is_restricted() {
        format!("{} restaurants {location}", dietary.as_str())
    } else {
        format!("best restaurants {location}")
    };
    let secondary = if child_friendly {
        format!("family friendly restaurants {location}")
    } else {
        format!("popular eateries {location}")
    };
    vec![primary, secondary]
}
