//! Normalization of strategy payloads into [`ExtractedData`].
//!
//! Each strategy's model answers in roughly the requested shape, but field
//! names drift (`qty` vs `quantity`, `desc` vs `description`) and numbers
//! arrive as `"$1,250.00"`. The normalizer maps every known alias onto the
//! canonical field, coerces types, and drops entries without their key field.
//! It is pure and idempotent.

use crate::output::{BidItem, ExtractedData, Material, ProjectInfo, Specification};
use crate::pipeline::aggregate::is_truthy;
use serde_json::{Map, Value};
use tracing::warn;

/// First truthy value among `aliases`.
fn pick<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().filter_map(|a| obj.get(*a)).find(|v| is_truthy(v))
}

fn string_field(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    pick(obj, aliases).and_then(normalize_string)
}

/// First alias that coerces to a number. Zero counts, so a normalized
/// payload normalizes to itself.
fn number_field(obj: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    aliases
        .iter()
        .filter_map(|a| obj.get(*a))
        .find_map(normalize_number)
}

/// Trimmed string; numbers and booleans rendered; empty → `None`.
fn normalize_string(v: &Value) -> Option<String> {
    let s = match v {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    };
    (!s.is_empty()).then_some(s)
}

/// JSON number, or a string after removing `,` and `$`.
fn normalize_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace([',', '$'], "").parse().ok(),
        _ => None,
    }
}

fn objects<'a>(data: &'a Map<String, Value>, key: &str) -> impl Iterator<Item = &'a Map<String, Value>> {
    data.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn bid_item(o: &Map<String, Value>) -> Option<BidItem> {
    let item = BidItem {
        item_number: string_field(o, &["item_number", "number", "id"]),
        description: string_field(o, &["description", "desc", "name"]),
        quantity: number_field(o, &["quantity", "qty", "amount"]),
        unit: string_field(o, &["unit", "units", "uom"]),
        unit_price: number_field(o, &["unit_price", "price", "cost"]),
    };
    (item.item_number.is_some() || item.description.is_some()).then_some(item)
}

fn specification(o: &Map<String, Value>) -> Option<Specification> {
    let spec = Specification {
        code: string_field(o, &["code", "spec_code", "specification"]),
        description: string_field(o, &["description", "desc", "title"]),
    };
    spec.code.is_some().then_some(spec)
}

fn project_info(o: Option<&Map<String, Value>>) -> ProjectInfo {
    let Some(o) = o else {
        return ProjectInfo::default();
    };
    ProjectInfo {
        name: string_field(o, &["name", "project_name", "title"]),
        location: string_field(o, &["location", "site", "address"]),
        bid_date: string_field(o, &["bid_date", "date", "due_date"]),
    }
}

fn material(o: &Map<String, Value>) -> Option<Material> {
    let m = Material {
        name: string_field(o, &["name", "material", "description"]),
        quantity: number_field(o, &["quantity", "qty", "amount"]),
        unit: string_field(o, &["unit", "units", "uom"]),
        specification: string_field(o, &["specification", "spec", "spec_code"]),
    };
    m.name.is_some().then_some(m)
}

/// Map a raw payload onto the canonical schema.
pub fn normalize(data: &Value) -> ExtractedData {
    let Some(obj) = data.as_object().filter(|o| !o.is_empty()) else {
        return ExtractedData::default();
    };

    ExtractedData {
        bid_items: objects(obj, "bid_items").filter_map(bid_item).collect(),
        specifications: objects(obj, "specifications")
            .filter_map(specification)
            .collect(),
        project_info: project_info(obj.get("project_info").and_then(Value::as_object)),
        materials: objects(obj, "materials").filter_map(material).collect(),
        raw_text: obj.get("raw_text").and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
    }
}

/// [`normalize`], returned as JSON.
pub fn normalize_value(data: &Value) -> Value {
    serde_json::to_value(normalize(data)).unwrap_or_else(|e| {
        warn!("Normalized payload could not be serialised: {}", e);
        Value::Object(Map::new())
    })
}

/// Whether `data` has the four top-level sections with the right types.
pub fn validate_schema(data: &Value) -> bool {
    let Some(obj) = data.as_object() else {
        return false;
    };
    for (key, want_list) in [
        ("bid_items", true),
        ("specifications", true),
        ("project_info", false),
        ("materials", true),
    ] {
        let ok = match obj.get(key) {
            None => {
                warn!("Missing required key: {}", key);
                return false;
            }
            Some(v) if want_list => v.is_array(),
            Some(v) => v.is_object(),
        };
        if !ok {
            warn!("{} has the wrong type", key);
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aliases_and_currency_are_coerced() {
        let raw = json!({
            "bid_items": [
                {"number": 101, "desc": "  Clearing and Grubbing ", "qty": "1,200", "uom": "SY", "price": "$3.50"},
                {"quantity": 5},
                "garbage"
            ],
            "specifications": [{"spec_code": "ASTM C150", "title": "Portland Cement"}, {"title": "orphan"}],
            "project_info": {"project_name": "Highway 90 Expansion", "site": "Lafayette, LA", "due_date": ""},
            "materials": [{"material": "Concrete", "amount": 500, "units": "CY", "spec": "ASTM C150"}]
        });
        let out = normalize(&raw);

        assert_eq!(out.bid_items.len(), 1);
        let item = &out.bid_items[0];
        assert_eq!(item.item_number.as_deref(), Some("101"));
        assert_eq!(item.description.as_deref(), Some("Clearing and Grubbing"));
        assert_eq!(item.quantity, Some(1200.0));
        assert_eq!(item.unit.as_deref(), Some("SY"));
        assert_eq!(item.unit_price, Some(3.5));

        assert_eq!(out.specifications.len(), 1);
        assert_eq!(out.specifications[0].description.as_deref(), Some("Portland Cement"));
        assert_eq!(out.project_info.name.as_deref(), Some("Highway 90 Expansion"));
        assert_eq!(out.project_info.bid_date, None);
        assert_eq!(out.materials[0].quantity, Some(500.0));
        assert_eq!(out.materials[0].specification.as_deref(), Some("ASTM C150"));
        assert!(out.raw_text.is_none());
    }

    #[test]
    fn falsy_alias_falls_through() {
        let raw = json!({"bid_items": [{"item_number": "", "id": "A-7", "description": "Rebar"}]});
        let out = normalize(&raw);
        assert_eq!(out.bid_items[0].item_number.as_deref(), Some("A-7"));
    }

    #[test]
    fn unparseable_number_is_none() {
        let raw = json!({"materials": [{"name": "Studs", "quantity": "lots"}]});
        assert_eq!(normalize(&raw).materials[0].quantity, None);
    }

    #[test]
    fn empty_or_non_object_input_yields_empty_schema() {
        assert_eq!(normalize(&json!({})), ExtractedData::default());
        assert_eq!(normalize(&json!(null)), ExtractedData::default());
        assert_eq!(normalize(&json!([1, 2])), ExtractedData::default());
        assert!(validate_schema(&normalize_value(&json!("x"))));
    }

    #[test]
    fn raw_text_is_carried_through() {
        let out = normalize(&json!({"raw_text": "1 EA WINDOW\n", "bid_items": []}));
        assert_eq!(out.raw_text.as_deref(), Some("1 EA WINDOW\n"));
    }

    #[test]
    fn normalize_value_is_idempotent() {
        let raw = json!({
            "bid_items": [{"id": "3", "name": "Form work", "qty": "$1,000", "unit": " LF "}],
            "project_info": {"title": "Lot 195"},
            "materials": [{"description": "2x6 SYP"}],
            "raw_text": "abc"
        });
        let once = normalize_value(&raw);
        let twice = normalize_value(&once);
        assert_eq!(once, twice);
        assert!(validate_schema(&once));
    }

    #[test]
    fn zero_quantities_survive_repeated_normalization() {
        let raw = json!({
            "bid_items": [{"item_number": "7", "description": "Allowance", "quantity": 0, "unit_price": "$0.00"}],
            "materials": [{"name": "Rebar", "quantity": "0"}]
        });
        let once = normalize_value(&raw);
        assert_eq!(once["bid_items"][0]["quantity"], json!(0.0));
        assert_eq!(once["bid_items"][0]["unit_price"], json!(0.0));
        assert_eq!(once["materials"][0]["quantity"], json!(0.0));
        assert_eq!(normalize_value(&once), once);
    }

    #[test]
    fn unparseable_alias_falls_through_to_next_number() {
        let raw = json!({"materials": [{"name": "Studs", "quantity": "n/a", "qty": 12}]});
        assert_eq!(normalize(&raw).materials[0].quantity, Some(12.0));
    }

    #[test]
    fn validate_schema_checks_types() {
        assert!(!validate_schema(&json!([])));
        assert!(!validate_schema(&json!({"bid_items": [], "specifications": [], "materials": []})));
        assert!(!validate_schema(&json!({
            "bid_items": {}, "specifications": [], "project_info": {}, "materials": []
        })));
        assert!(validate_schema(&json!({
            "bid_items": [], "specifications": [], "project_info": {}, "materials": []
        })));
    }
}
