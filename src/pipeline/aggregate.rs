//! Merging per-tile extraction payloads into one document payload.
//!
//! Overlapping tiles read the same table row twice, and the model does not
//! transcribe it identically both times ("2x4 Stud" vs "2x4 stud "). Items
//! are therefore deduplicated by fuzzy similarity of their key fields rather
//! than by equality.
//!
//! Payloads are handled as raw `serde_json::Value`s: the model may add
//! fields the schema does not know, and normalization happens later.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

/// Key fields per section.
const BID_ITEM_KEYS: &[&str] = &["item_number", "description"];
const SPECIFICATION_KEYS: &[&str] = &["code"];
const MATERIAL_KEYS: &[&str] = &["name"];

/// Whether a JSON value counts as present: not null, false, 0, "" or empty.
pub(crate) fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Similarity of two strings on a 0–100 scale (normalized Levenshtein).
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Comparison key: truthy key-field values, lower-cased, trimmed, joined.
fn item_key(item: &Map<String, Value>, key_fields: &[&str]) -> Option<String> {
    let parts: Vec<String> = key_fields
        .iter()
        .filter_map(|f| item.get(*f))
        .filter(|v| is_truthy(v))
        .map(|v| match v {
            Value::String(s) => s.to_lowercase().trim().to_string(),
            other => other.to_string().to_lowercase().trim().to_string(),
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Merge similar items into one, keeping the first non-empty value of each
/// field. Fields starting with `_` are dropped.
pub fn merge_items(items: &[&Map<String, Value>]) -> Map<String, Value> {
    let mut merged = Map::new();
    for item in items {
        for (k, v) in item.iter() {
            if k.starts_with('_') {
                continue;
            }
            let empty = match merged.get(k) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            };
            if empty {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    merged
}

/// Fuzzy-deduplicate `items` on `key_fields`.
///
/// Items without any key value are dropped. Each remaining item absorbs every
/// later item whose key reaches `threshold` (0–100) similarity.
pub fn deduplicate_items(items: &[Value], key_fields: &[&str], threshold: f64) -> Vec<Value> {
    let keyed: Vec<(&Map<String, Value>, Option<String>)> = items
        .iter()
        .filter_map(Value::as_object)
        .map(|o| (o, item_key(o, key_fields)))
        .collect();

    let mut used = vec![false; keyed.len()];
    let mut unique = Vec::new();

    for i in 0..keyed.len() {
        if used[i] {
            continue;
        }
        let Some(key) = keyed[i].1.as_deref() else {
            continue;
        };

        let mut group = vec![keyed[i].0];
        for j in (i + 1)..keyed.len() {
            if used[j] {
                continue;
            }
            if let Some(other) = keyed[j].1.as_deref() {
                if similarity(key, other) >= threshold {
                    used[j] = true;
                    group.push(keyed[j].0);
                }
            }
        }
        unique.push(Value::Object(merge_items(&group)));
    }
    unique
}

/// Merge project-info maps, most complete first, back-filling empty keys.
pub fn merge_project_info(infos: &[&Map<String, Value>]) -> Value {
    let mut sorted: Vec<&Map<String, Value>> = infos.to_vec();
    sorted.sort_by_key(|p| std::cmp::Reverse(p.values().filter(|v| is_truthy(v)).count()));

    let Some((first, rest)) = sorted.split_first() else {
        return json!({"name": null, "location": null, "bid_date": null});
    };

    let mut merged = (*first).clone();
    for info in rest {
        for (k, v) in info.iter() {
            if !merged.get(k).is_some_and(is_truthy) {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(merged)
}

/// Combine per-tile payloads into one deduplicated payload.
pub fn aggregate_results(results: &[Value], fuzzy_threshold: f64) -> Value {
    let mut bid_items = Vec::new();
    let mut specifications = Vec::new();
    let mut materials = Vec::new();
    let mut project_infos = Vec::new();

    let section = |r: &Value, key: &str| -> Vec<Value> {
        r.get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };

    for r in results {
        bid_items.extend(section(r, "bid_items"));
        specifications.extend(section(r, "specifications"));
        materials.extend(section(r, "materials"));
        if let Some(p) = r.get("project_info").and_then(Value::as_object) {
            if p.values().any(is_truthy) {
                project_infos.push(p);
            }
        }
    }

    let bid_items = deduplicate_items(&bid_items, BID_ITEM_KEYS, fuzzy_threshold);
    let specifications = deduplicate_items(&specifications, SPECIFICATION_KEYS, fuzzy_threshold);
    let materials = deduplicate_items(&materials, MATERIAL_KEYS, fuzzy_threshold);

    info!(
        "Aggregation complete: {} bid items, {} specs, {} materials",
        bid_items.len(),
        specifications.len(),
        materials.len()
    );

    json!({
        "bid_items": bid_items,
        "specifications": specifications,
        "project_info": merge_project_info(&project_infos),
        "materials": materials,
    })
}

// ── Confidence ───────────────────────────────────────────────────────────

/// Weights of the advisory completeness score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    /// Any bid items at all.
    pub bid_items: f64,
    /// Scaled by the share of bid items with both number and description.
    pub complete_bid_items: f64,
    pub project_info: f64,
    pub specifications: f64,
    pub materials: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            bid_items: 0.4,
            complete_bid_items: 0.2,
            project_info: 0.2,
            specifications: 0.1,
            materials: 0.1,
        }
    }
}

/// Completeness score of a payload in `[0, 1]`.
pub fn calculate_confidence(data: &Value, weights: &ConfidenceWeights) -> f64 {
    let mut score = 0.0;

    if let Some(items) = data.get("bid_items").and_then(Value::as_array) {
        if !items.is_empty() {
            score += weights.bid_items;
            let complete = items
                .iter()
                .filter(|i| {
                    i.get("item_number").is_some_and(is_truthy)
                        && i.get("description").is_some_and(is_truthy)
                })
                .count();
            score += weights.complete_bid_items * (complete as f64 / items.len() as f64).min(1.0);
        }
    }

    if data
        .get("project_info")
        .and_then(Value::as_object)
        .is_some_and(|p| p.values().any(is_truthy))
    {
        score += weights.project_info;
    }
    if data.get("specifications").is_some_and(is_truthy) {
        score += weights.specifications;
    }
    if data.get("materials").is_some_and(is_truthy) {
        score += weights.materials;
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_duplicate_bid_items_merge() {
        let items = vec![
            json!({"item_number": "12", "description": "2x4 Stud"}),
            json!({"item_number": "12", "description": "2x4 stud ", "quantity": 40}),
        ];
        let out = deduplicate_items(&items, BID_ITEM_KEYS, 85.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["description"], "2x4 Stud");
        assert_eq!(out[0]["quantity"], 40);
    }

    #[test]
    fn distinct_items_stay_apart_and_keyless_are_dropped() {
        let items = vec![
            json!({"item_number": "101", "description": "Clearing and Grubbing"}),
            json!({"item_number": "202", "description": "Portland Cement Concrete"}),
            json!({"quantity": 5}),
            json!("not an object"),
        ];
        let out = deduplicate_items(&items, BID_ITEM_KEYS, 85.0);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn merge_prefers_first_non_empty_and_drops_private_fields() {
        let a = json!({"name": "", "unit": null, "_tile": 3});
        let b = json!({"name": "Concrete", "unit": "CY", "_tile": 4});
        let merged = merge_items(&[a.as_object().unwrap(), b.as_object().unwrap()]);
        assert_eq!(merged.get("name"), Some(&json!("Concrete")));
        assert_eq!(merged.get("unit"), Some(&json!("CY")));
        assert!(!merged.contains_key("_tile"));
    }

    #[test]
    fn project_info_starts_from_most_complete() {
        let sparse = json!({"name": "Lot 195", "location": null, "bid_date": null});
        let full = json!({"name": "Lot 195 Residence", "location": "Lafayette", "bid_date": null});
        let date = json!({"bid_date": "2024-03-15"});
        let merged = merge_project_info(&[
            sparse.as_object().unwrap(),
            full.as_object().unwrap(),
            date.as_object().unwrap(),
        ]);
        assert_eq!(merged["name"], "Lot 195 Residence");
        assert_eq!(merged["location"], "Lafayette");
        assert_eq!(merged["bid_date"], "2024-03-15");
    }

    #[test]
    fn empty_project_info_is_all_null() {
        let merged = merge_project_info(&[]);
        assert_eq!(merged, json!({"name": null, "location": null, "bid_date": null}));
    }

    #[test]
    fn aggregate_flattens_and_dedups_every_section() {
        let tiles = vec![
            json!({
                "bid_items": [{"item_number": "1", "description": "2x4 studs", "quantity": 100}],
                "materials": [{"name": "2x4 Pine Studs"}],
                "specifications": [{"code": "#2 Pine"}],
                "project_info": {"name": null}
            }),
            json!({
                "bid_items": [{"item_number": "1", "description": "2x4 Studs"}],
                "materials": [{"name": "2x4 pine studs"}, {"name": "1/2\" Drywall"}],
                "specifications": [{"code": "#2 pine"}],
                "project_info": {"name": "Lot 195", "location": "Lafayette"}
            }),
            json!({"garbage": true}),
        ];
        let out = aggregate_results(&tiles, 85.0);
        assert_eq!(out["bid_items"].as_array().unwrap().len(), 1);
        assert_eq!(out["materials"].as_array().unwrap().len(), 2);
        assert_eq!(out["specifications"].as_array().unwrap().len(), 1);
        assert_eq!(out["project_info"]["name"], "Lot 195");
    }

    #[test]
    fn confidence_weights_sum_to_one_for_complete_payload() {
        let data = json!({
            "bid_items": [{"item_number": "101", "description": "Clearing"}],
            "specifications": [{"code": "ASTM C150"}],
            "materials": [{"name": "Concrete"}],
            "project_info": {"name": "Highway 90"}
        });
        let c = calculate_confidence(&data, &ConfidenceWeights::default());
        assert!((c - 1.0).abs() < 1e-9);
    }

    #[test]
    fn confidence_scales_with_complete_bid_items() {
        let data = json!({
            "bid_items": [
                {"item_number": "1", "description": "Studs"},
                {"description": "Nails"}
            ]
        });
        let c = calculate_confidence(&data, &ConfidenceWeights::default());
        assert!((c - 0.5).abs() < 1e-9);
        assert_eq!(calculate_confidence(&json!({}), &ConfidenceWeights::default()), 0.0);
    }

    #[test]
    fn similarity_scale() {
        assert_eq!(similarity("abc", "abc"), 100.0);
        assert!(similarity("concrete", "asphalt") < 50.0);
    }
}
