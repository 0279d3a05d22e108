//! Offline synthesis: the enrichment path that never fails.
//!
//! Produces a fixed five-step procedure shaped for either a beverage or a
//! dish, quoting the record's known ingredients and tools verbatim.

use larder_shared::{Ingredient, is_stale_error};

use crate::enrichment::{EnrichmentRequest, EnrichmentResult};

/// Source tag reported for synthesized results.
pub const SYNTHESIS_SOURCE: &str = "offline-synthesis";

/// Name words that mark a beverage.
const BEVERAGE_WORDS: &[&str] = &[
    "ice", "iced", "es", "tea", "teh", "kopi", "coffee", "latte", "jus", "juice", "boba",
    "squash", "drink", "smoothie", "milkshake",
];

/// Whether the item name looks like a beverage.
pub fn is_beverage(name: &str) -> bool {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| BEVERAGE_WORDS.contains(&word))
}

/// Build the fallback result for `request`. Steps are always non-empty.
pub fn synthesize(request: &EnrichmentRequest) -> EnrichmentResult {
    let beverage = is_beverage(&request.name);
    let ingredients = quote_ingredients(&request.ingredients);
    let tools = quote_list(&request.tools);

    let steps = if beverage {
        vec![
            format!(
                "Prepare a clean glass{}. Ingredients: {}.",
                tools.as_deref().map(|t| format!(" and {t}")).unwrap_or_default(),
                ingredients.as_deref().unwrap_or("as listed")
            ),
            "Put the main ingredients into the glass or shaker.".to_string(),
            "Add ice cubes as needed.".to_string(),
            "Top up with water, milk or the remaining liquids.".to_string(),
            "Stir well and serve cold.".to_string(),
        ]
    } else {
        vec![
            format!(
                "Prepare the ingredients: {}. Wash them thoroughly.",
                ingredients.as_deref().unwrap_or("everything listed")
            ),
            format!(
                "Heat {} over medium heat.",
                tools.as_deref().unwrap_or("the cookware")
            ),
            "Cook the main ingredients until done.".to_string(),
            "Add the seasoning and adjust to taste.".to_string(),
            "Remove from the heat and serve warm.".to_string(),
        ]
    };

    let description = match request.description.as_deref() {
        Some(d) if !d.trim().is_empty() && !is_stale_error(d) => None,
        _ if beverage => Some(format!(
            "A refreshing {} with a well-balanced taste.",
            request.name
        )),
        _ => Some(format!(
            "A delicious {} to enjoy any time of day.",
            request.name
        )),
    };

    EnrichmentResult {
        description,
        ingredients: None,
        steps,
        source_endpoint: SYNTHESIS_SOURCE.to_string(),
    }
}

fn quote_ingredients(ingredients: &[Ingredient]) -> Option<String> {
    if ingredients.is_empty() {
        return None;
    }
    Some(
        ingredients
            .iter()
            .map(Ingredient::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    )
}

fn quote_list(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join(", "))
    }
}
