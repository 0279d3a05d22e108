//! Field parsing for list-valued cells.

use larder_shared::{Ingredient, UNIT_AS_NEEDED};

/// Separators for ingredient and tool lists, in preference order.
pub const LIST_SEPARATORS: &[char] = &[';', ','];

/// Steps only split on `;` since step sentences contain commas.
pub const STEP_SEPARATORS: &[char] = &[';'];

/// Split a raw cell into trimmed, non-empty items.
///
/// The separator is the first of `preferred` that occurs in `raw`; when none
/// occurs the last one is used (yielding a single item). A comma between two
/// digits is a decimal separator, never a list separator.
pub fn split_list(raw: &str, preferred: &[char]) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    let Some(sep) = preferred
        .iter()
        .copied()
        .find(|&c| split_points(raw, c).next().is_some())
        .or_else(|| preferred.last().copied())
    else {
        return vec![raw.to_string()];
    };

    let mut items = Vec::new();
    let mut start = 0;
    for idx in split_points(raw, sep) {
        items.push(&raw[start..idx]);
        start = idx + sep.len_utf8();
    }
    items.push(&raw[start..]);

    items
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Byte offsets where `sep` splits `raw`.
fn split_points(raw: &str, sep: char) -> impl Iterator<Item = usize> + '_ {
    let bytes = raw.as_bytes();
    raw.match_indices(sep).map(|(i, _)| i).filter(move |&i| {
        if sep != ',' {
            return true;
        }
        let before = i.checked_sub(1).map(|j| bytes[j]);
        let after = bytes.get(i + 1).copied();
        !matches!((before, after), (Some(b), Some(a)) if b.is_ascii_digit() && a.is_ascii_digit())
    })
}

/// Parse the leading number of a quantity cell.
///
/// Accepts `,` as the decimal separator. Missing, invalid, negative and
/// non-finite input all yield `0`.
pub fn parse_quantity(raw: &str) -> f64 {
    let raw = raw.trim();
    let mut number = String::new();
    let mut seen_point = false;
    for c in raw.chars() {
        match c {
            '0'..='9' => number.push(c),
            '.' | ',' if !seen_point => {
                seen_point = true;
                number.push('.');
            }
            _ => break,
        }
    }

    match number.trim_end_matches('.').parse::<f64>() {
        Ok(q) if q.is_finite() && q >= 0.0 => q,
        _ => 0.0,
    }
}

/// Parse an ingredient cell of `name|quantity|unit` items.
///
/// Items without a name are dropped; a missing unit becomes `"as needed"`.
pub fn parse_ingredient_cell(cell: &str) -> Vec<Ingredient> {
    split_list(cell, LIST_SEPARATORS)
        .into_iter()
        .filter_map(|item| {
            let mut parts = item.splitn(3, '|').map(str::trim);
            let name = parts.next().filter(|n| !n.is_empty())?;
            let quantity = parts.next().map(parse_quantity).unwrap_or(0.0);
            let unit = parts
                .next()
                .filter(|u| !u.is_empty())
                .unwrap_or(UNIT_AS_NEEDED);
            Some(Ingredient {
                name: name.to_string(),
                quantity,
                unit: unit.to_string(),
            })
        })
        .collect()
}
