pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

pub fn contains_any(input: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| input.contains(needle))
}

/// Appends items not already present, keeping first-seen order.
pub fn push_unique<I, S>(target: &mut Vec<String>, items: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for item in items {
        let item = item.as_ref();
        if !target.iter().any(|existing| existing == item) {
            target.push(item.to_string());
        }
    }
}

pub fn dedupe_preserving_order<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    push_unique(&mut out, items);
    out
}
