//! Field projection for listing items.

use crate::types::Listing;
use serde_json::Value;
use std::collections::HashSet;

/// Requesting this field disables projection entirely.
pub const WILDCARD: &str = "*";

/// Allow-list of fields kept on each item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Keep every field.
    All,
    /// Keep only the listed fields.
    Only(HashSet<String>),
}

impl Projection {
    /// Base fields plus any requested ones. Unknown names simply never match.
    pub fn new(base_fields: &[&str], requested: Option<&[String]>) -> Self {
        let requested = requested.unwrap_or_default();
        if requested.iter().any(|f| f == WILDCARD) {
            return Projection::All;
        }
        let allowed = base_fields
            .iter()
            .map(|f| f.to_string())
            .chain(requested.iter().cloned())
            .collect();
        Projection::Only(allowed)
    }

    /// Projection using the listing's default fields.
    pub fn for_listing(listing: Listing, requested: Option<&[String]>) -> Self {
        Self::new(listing.base_fields(), requested)
    }

    pub fn allows(&self, field: &str) -> bool {
        match self {
            Projection::All => true,
            Projection::Only(allowed) => allowed.contains(field),
        }
    }

    /// Reduces one item. Keys keep the order they had in the item;
    /// values that are not objects pass through untouched.
    pub fn apply(&self, item: Value) -> Value {
        match (self, item) {
            (Projection::All, item) => item,
            (Projection::Only(_), Value::Object(map)) => Value::Object(
                map.into_iter()
                    .filter(|(key, _)| self.allows(key))
                    .collect(),
            ),
            (Projection::Only(_), other) => other,
        }
    }

    pub fn apply_all(&self, items: Vec<Value>) -> Vec<Value> {
        items.into_iter().map(|item| self.apply(item)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product() -> Value {
        json!({
            "ID": "a1",
            "SKU": "SKU-1",
            "Name": "Widget",
            "Category": "Tools",
            "PriceTier1": 9.5
        })
    }

    #[test]
    fn test_default_subset() {
        let projection = Projection::for_listing(Listing::Products, None);
        assert_eq!(
            projection.apply(product()),
            json!({"SKU": "SKU-1", "Name": "Widget"})
        );
    }

    #[test]
    fn test_requested_fields_union_defaults() {
        let fields = vec![
            "Category".to_string(),
            "SKU".to_string(),
            "DoesNotExist".to_string(),
        ];
        let projection = Projection::for_listing(Listing::Products, Some(&fields));
        assert_eq!(
            projection.apply(product()),
            json!({"SKU": "SKU-1", "Name": "Widget", "Category": "Tools"})
        );
    }

    #[test]
    fn test_preserves_item_key_order() {
        let fields = vec!["PriceTier1".to_string(), "ID".to_string()];
        let projection = Projection::for_listing(Listing::Products, Some(&fields));
        let projected = projection.apply(product());
        let keys: Vec<_> = projected.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["ID", "SKU", "Name", "PriceTier1"]);
    }

    #[test]
    fn test_wildcard_keeps_everything() {
        let fields = vec![WILDCARD.to_string()];
        let projection = Projection::for_listing(Listing::Products, Some(&fields));
        assert_eq!(projection, Projection::All);
        assert_eq!(projection.apply(product()), product());
    }

    #[test]
    fn test_stock_defaults_and_non_objects() {
        let projection = Projection::for_listing(Listing::StockAvailability, None);
        let items = vec![
            json!({"SKU": "S", "Location": "Main", "OnHand": 4, "Available": 3, "Bin": "A1"}),
            json!("not an object"),
        ];
        assert_eq!(
            projection.apply_all(items),
            vec![
                json!({"SKU": "S", "Location": "Main", "OnHand": 4, "Available": 3}),
                json!("not an object"),
            ]
        );
    }
}
