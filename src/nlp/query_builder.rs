use crate::core::types::{CharacteristicKey, Query};
use regex::Regex;
use std::sync::OnceLock;

/// Characteristics appended to the search box text, in priority order.
const PHRASE_KEYS: [CharacteristicKey; 7] = [
    CharacteristicKey::Brand,
    CharacteristicKey::Model,
    CharacteristicKey::Category,
    CharacteristicKey::Type,
    CharacteristicKey::Color,
    CharacteristicKey::Size,
    CharacteristicKey::Material,
];

const MAX_PARTS: usize = 5;

fn punctuation() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s-]").expect("static regex"))
}

/// Outgoing search phrase for a query: the free text plus characteristic values
/// the text does not already mention, at most [`MAX_PARTS`] parts in total.
pub fn search_phrase(query: &Query) -> String {
    let mut parts: Vec<&str> = vec![query.text()];
    let lower = query.text().to_lowercase();

    for key in PHRASE_KEYS {
        if let Some(value) = query.characteristics().get(key) {
            if parts.len() >= MAX_PARTS {
                break;
            }
            if !lower.contains(&value.to_lowercase()) {
                parts.push(value);
            }
        }
    }

    let joined = parts.join(" ");
    let cleaned = punctuation().replace_all(&joined, " ");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Characteristics;

    #[test]
    fn appends_missing_characteristics_in_priority_order() {
        let chars = Characteristics::new()
            .with(CharacteristicKey::Brand, "Apple")
            .with(CharacteristicKey::Model, "13 Pro")
            .with(CharacteristicKey::Color, "black");
        let q = Query::new("apple phone", chars).unwrap();
        assert_eq!(search_phrase(&q), "apple phone 13 Pro black");
    }

    #[test]
    fn phrase_is_capped_at_five_parts() {
        let chars = Characteristics::new()
            .with(CharacteristicKey::Brand, "Nike")
            .with(CharacteristicKey::Model, "Pegasus 40")
            .with(CharacteristicKey::Category, "running")
            .with(CharacteristicKey::Type, "trainers")
            .with(CharacteristicKey::Color, "blue")
            .with(CharacteristicKey::Size, "44");
        let q = Query::new("shoes", chars).unwrap();
        assert_eq!(search_phrase(&q), "shoes Nike Pegasus 40 running trainers");
    }

    #[test]
    fn strips_punctuation_but_keeps_hyphens() {
        let q = Query::new("usb-c cable (2m)!", Characteristics::new()).unwrap();
        assert_eq!(search_phrase(&q), "usb-c cable 2m");
    }
}
