//! Active order, order items and the authoritative price fold.
//!
//! Item totals are always recomputed from the base price plus the surcharges
//! of the customizations that are currently applied. Surcharges come from the
//! [`CustomizationCatalog`]; a name that is not in the catalogue is dropped,
//! never priced by guess.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A priced customization (a stuffed border or an extra topping)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Customization {
    pub name: String,
    pub surcharge: Decimal,
}

impl Customization {
    pub fn new(name: impl Into<String>, surcharge: Decimal) -> Self {
        Self {
            name: name.into(),
            surcharge,
        }
    }
}

/// The customization vocabulary the business supports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomizationCatalog {
    pub borders: Vec<Customization>,
    pub additions: Vec<Customization>,
}

impl Default for CustomizationCatalog {
    fn default() -> Self {
        Self {
            borders: vec![
                Customization::new("catupiry", Decimal::new(800, 2)),
                Customization::new("cheddar", Decimal::new(800, 2)),
                Customization::new("chocolate", Decimal::new(1000, 2)),
            ],
            additions: vec![
                Customization::new("bacon", Decimal::new(500, 2)),
                Customization::new("extra cheese", Decimal::new(400, 2)),
                Customization::new("olives", Decimal::new(300, 2)),
                Customization::new("egg", Decimal::new(300, 2)),
            ],
        }
    }
}

impl CustomizationCatalog {
    pub fn border(&self, name: &str) -> Option<&Customization> {
        find_named(&self.borders, name)
    }

    pub fn addition(&self, name: &str) -> Option<&Customization> {
        find_named(&self.additions, name)
    }

    /// Human-readable vocabulary for model instructions
    pub fn vocabulary(&self) -> String {
        let list = |items: &[Customization]| {
            items
                .iter()
                .map(|c| format!("{} (+{})", c.name, c.surcharge))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "Borders: {}. Additions: {}.",
            list(&self.borders),
            list(&self.additions)
        )
    }
}

fn find_named<'a>(items: &'a [Customization], name: &str) -> Option<&'a Customization> {
    let needle = name.trim();
    items.iter().find(|c| c.name.eq_ignore_ascii_case(needle))
}

/// One line of the active order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub base_price: Decimal,
    pub total_price: Decimal,
    pub border: Option<Customization>,
    pub additions: Vec<Customization>,
}

impl OrderItem {
    pub fn new(
        product_id: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        base_price: Decimal,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            kind: kind.into(),
            base_price,
            total_price: base_price,
            border: None,
            additions: Vec::new(),
        }
    }

    pub fn set_border(&mut self, border: Option<Customization>) {
        self.border = border;
        self.recompute();
    }

    /// Add an addition; additions form a set keyed by name.
    pub fn add_addition(&mut self, addition: Customization) {
        if !self
            .additions
            .iter()
            .any(|a| a.name.eq_ignore_ascii_case(&addition.name))
        {
            self.additions.push(addition);
        }
        self.recompute();
    }

    pub fn clear_additions(&mut self) {
        self.additions.clear();
        self.recompute();
    }

    fn recompute(&mut self) {
        let border = self.border.as_ref().map(|b| b.surcharge).unwrap_or_default();
        let additions: Decimal = self.additions.iter().map(|a| a.surcharge).sum();
        self.total_price = self.base_price + border + additions;
    }
}

/// Outcome of folding a discovered product into the order
#[derive(Debug, Clone, PartialEq)]
pub enum FoldResult {
    Added { total_price: Decimal },
    Duplicate,
}

/// The single in-flight order of a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveOrder {
    pub order_id: String,
    pub items: Vec<OrderItem>,
    pub total: Decimal,
}

impl ActiveOrder {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            items: Vec::new(),
            total: Decimal::ZERO,
        }
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, product_id: &str, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.product_id == product_id && i.name.eq_ignore_ascii_case(name))
    }

    /// Merge a product found by a tool call into the order.
    ///
    /// The item price is recomputed from the base price and catalogue
    /// surcharges. A product already present (same id and name) is skipped.
    pub fn fold(&mut self, product: &DiscoveredProduct, catalog: &CustomizationCatalog) -> FoldResult {
        let product_id = product.id();
        if self.position(&product_id, &product.name).is_some() {
            tracing::info!(
                order_id = %self.order_id,
                product_id = %product_id,
                name = %product.name,
                "Product already in order, skipping fold"
            );
            return FoldResult::Duplicate;
        }

        let mut item = OrderItem::new(product_id, &product.name, &product.kind, product.base_price);
        apply_customizations(&mut item, product, catalog);
        let total_price = item.total_price;
        self.items.push(item);
        self.recompute_total();
        FoldResult::Added { total_price }
    }

    /// Re-apply the customizations carried by a payload to an existing item.
    /// Returns `false` when the item is not in the order.
    pub fn customize(&mut self, product: &DiscoveredProduct, catalog: &CustomizationCatalog) -> bool {
        let Some(idx) = self.position(&product.id(), &product.name) else {
            return false;
        };
        let item = &mut self.items[idx];
        if product.border.is_some() {
            item.set_border(None);
        }
        if !product.additions.is_empty() {
            item.clear_additions();
        }
        apply_customizations(item, product, catalog);
        self.recompute_total();
        true
    }

    /// Remove an item by product id; returns whether anything was removed
    pub fn remove(&mut self, product_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        let removed = self.items.len() != before;
        if removed {
            self.recompute_total();
        }
        removed
    }

    fn recompute_total(&mut self) {
        self.total = self.items.iter().map(|i| i.total_price).sum();
    }

    /// One line per item, for model instructions
    pub fn describe_items(&self) -> String {
        if self.items.is_empty() {
            return "(no items)".to_string();
        }
        self.items
            .iter()
            .map(|i| {
                let mut line = format!("- {} [{}] {}", i.name, i.product_id, i.total_price);
                if let Some(ref b) = i.border {
                    line.push_str(&format!(", border: {}", b.name));
                }
                if !i.additions.is_empty() {
                    let names: Vec<&str> = i.additions.iter().map(|a| a.name.as_str()).collect();
                    line.push_str(&format!(", additions: {}", names.join(", ")));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn apply_customizations(item: &mut OrderItem, product: &DiscoveredProduct, catalog: &CustomizationCatalog) {
    if let Some(ref border) = product.border {
        match catalog.border(border) {
            Some(c) => item.set_border(Some(c.clone())),
            None => tracing::warn!(border = %border, "Unknown border, not priced"),
        }
    }
    for addition in &product.additions {
        match catalog.addition(addition) {
            Some(c) => item.add_addition(c.clone()),
            None => tracing::warn!(addition = %addition, "Unknown addition, not priced"),
        }
    }
}

/// A product recognised in a tool payload (it has a name and a price)
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredProduct {
    pub product_id: Option<String>,
    pub name: String,
    pub kind: String,
    pub base_price: Decimal,
    pub border: Option<String>,
    pub additions: Vec<String>,
}

impl DiscoveredProduct {
    /// Product id, falling back to the lowercased name when the payload has none
    pub fn id(&self) -> String {
        self.product_id
            .clone()
            .unwrap_or_else(|| self.name.to_lowercase())
    }

    /// Look for a product in a tool payload: the payload itself, or its
    /// `product` / `item` member.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        Self::from_object(payload)
            .or_else(|| payload.get("product").and_then(Self::from_object))
            .or_else(|| payload.get("item").and_then(Self::from_object))
    }

    fn from_object(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let name = obj
            .get("name")
            .or_else(|| obj.get("product_name"))
            .and_then(Value::as_str)?
            .trim();
        if name.is_empty() {
            return None;
        }
        let base_price = obj
            .get("base_price")
            .or_else(|| obj.get("price"))
            .and_then(parse_decimal)?;

        let product_id = obj
            .get("product_id")
            .or_else(|| obj.get("id"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        let kind = obj
            .get("type")
            .or_else(|| obj.get("category"))
            .and_then(Value::as_str)
            .unwrap_or("product")
            .to_string();
        let border = obj
            .get("border")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let additions = obj
            .get("additions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            product_id,
            name: name.to_string(),
            kind,
            base_price,
            border,
            additions,
        })
    }
}

fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}
