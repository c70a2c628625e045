//! In-memory records behind the demo tools

use std::collections::HashMap;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Serialize)]
pub struct MenuItem {
    pub product_id: String,
    pub name: String,
    pub category: String,
    pub price: Decimal,
}

impl MenuItem {
    fn new(product_id: &str, name: &str, category: &str, cents: i64) -> Self {
        Self {
            product_id: product_id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            price: Decimal::new(cents, 2),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "product_id": self.product_id,
            "name": self.name,
            "type": self.category,
            "price": self.price.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Confirmed,
    Finalized,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderLine {
    pub product_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub category: String,
    pub price: Decimal,
    pub border: Option<String>,
    pub additions: Vec<String>,
}

impl OrderLine {
    pub fn to_json(&self) -> Value {
        json!({
            "product_id": self.product_id,
            "name": self.name,
            "type": self.category,
            "price": self.price.to_string(),
            "border": self.border,
            "additions": self.additions,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub customer_id: String,
    pub status: OrderStatus,
    pub items: Vec<OrderLine>,
}

impl OrderRecord {
    pub fn to_json(&self) -> Value {
        json!({
            "order_id": self.order_id,
            "customer_id": self.customer_id,
            "status": self.status,
            "items": self.items.iter().map(OrderLine::to_json).collect::<Vec<_>>(),
        })
    }
}

/// Menu, customers and orders for local runs
pub struct Store {
    menu: Vec<MenuItem>,
    customers: Mutex<HashMap<String, CustomerRecord>>,
    orders: Mutex<HashMap<String, OrderRecord>>,
}

impl Store {
    pub fn new(menu: Vec<MenuItem>) -> Self {
        Self {
            menu,
            customers: Mutex::new(HashMap::new()),
            orders: Mutex::new(HashMap::new()),
        }
    }

    /// A small pizzeria menu
    pub fn demo() -> Self {
        Self::new(vec![
            MenuItem::new("pz-calabresa", "Calabresa", "pizza", 4500),
            MenuItem::new("pz-margherita", "Margherita", "pizza", 4000),
            MenuItem::new("pz-portuguesa", "Portuguesa", "pizza", 4800),
            MenuItem::new("pz-frango", "Frango com Catupiry", "pizza", 5000),
            MenuItem::new("pz-chocolate", "Chocolate", "sweet pizza", 4200),
            MenuItem::new("bv-guarana", "Guaraná 2L", "drink", 1200),
            MenuItem::new("bv-coca", "Coca-Cola 2L", "drink", 1400),
        ])
    }

    pub fn menu(&self, category: Option<&str>) -> Vec<MenuItem> {
        self.menu
            .iter()
            .filter(|m| category.is_none_or(|c| m.category.eq_ignore_ascii_case(c)))
            .cloned()
            .collect()
    }

    /// Find a product by id, exact name, or name fragment
    pub fn find_product(&self, query: &str) -> Option<MenuItem> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }
        self.menu
            .iter()
            .find(|m| m.product_id == query || m.name.to_lowercase() == query)
            .or_else(|| self.menu.iter().find(|m| m.name.to_lowercase().contains(&query)))
            .cloned()
    }

    pub fn customer(&self, customer_id: &str) -> Option<CustomerRecord> {
        self.customers.lock().get(customer_id).cloned()
    }

    /// Create or update a customer; `None` fields keep their stored value
    pub fn upsert_customer(
        &self,
        customer_id: &str,
        name: Option<String>,
        phone: Option<String>,
        address: Option<String>,
    ) -> CustomerRecord {
        let mut customers = self.customers.lock();
        let record = customers
            .entry(customer_id.to_string())
            .or_insert_with(|| CustomerRecord {
                customer_id: customer_id.to_string(),
                ..Default::default()
            });
        if name.is_some() {
            record.name = name;
        }
        if phone.is_some() {
            record.phone = phone;
        }
        if address.is_some() {
            record.address = address;
        }
        record.clone()
    }

    /// The customer's order that is not finalized yet
    pub fn active_order(&self, customer_id: &str) -> Option<OrderRecord> {
        self.orders
            .lock()
            .values()
            .find(|o| o.customer_id == customer_id && o.status != OrderStatus::Finalized)
            .cloned()
    }

    pub fn order(&self, order_id: &str) -> Option<OrderRecord> {
        self.orders.lock().get(order_id).cloned()
    }

    pub fn create_order(&self, customer_id: &str) -> OrderRecord {
        let order = OrderRecord {
            order_id: uuid::Uuid::new_v4().to_string(),
            customer_id: customer_id.to_string(),
            status: OrderStatus::Open,
            items: Vec::new(),
        };
        self.orders
            .lock()
            .insert(order.order_id.clone(), order.clone());
        order
    }

    /// Add a line, or replace the customizations of the line with the same product
    pub fn put_line(&self, order_id: &str, line: OrderLine) -> Result<OrderLine, String> {
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| format!("order {} not found", order_id))?;
        if order.status == OrderStatus::Finalized {
            return Err(format!("order {} is already finalized", order_id));
        }
        order.status = OrderStatus::Open;
        match order.items.iter_mut().find(|l| l.product_id == line.product_id) {
            Some(existing) => {
                if line.border.is_some() {
                    existing.border = line.border.clone();
                }
                if !line.additions.is_empty() {
                    existing.additions = line.additions.clone();
                }
                Ok(existing.clone())
            }
            None => {
                order.items.push(line.clone());
                Ok(line)
            }
        }
    }

    pub fn remove_line(&self, order_id: &str, product_id: &str) -> Result<(), String> {
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| format!("order {} not found", order_id))?;
        let before = order.items.len();
        order.items.retain(|l| l.product_id != product_id);
        if order.items.len() == before {
            return Err(format!("{} is not in order {}", product_id, order_id));
        }
        order.status = OrderStatus::Open;
        Ok(())
    }

    /// Move an order to `status`, checking the transition is allowed
    pub fn advance_order(&self, order_id: &str, status: OrderStatus) -> Result<OrderRecord, String> {
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| format!("order {} not found", order_id))?;
        match (order.status, status) {
            (OrderStatus::Open, OrderStatus::Confirmed) if order.items.is_empty() => {
                Err("cannot confirm an empty order".to_string())
            }
            (OrderStatus::Open | OrderStatus::Confirmed, OrderStatus::Confirmed)
            | (OrderStatus::Confirmed, OrderStatus::Finalized) => {
                order.status = status;
                Ok(order.clone())
            }
            (from, to) => Err(format!("cannot move order from {:?} to {:?}", from, to)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(store: &Store, query: &str) -> OrderLine {
        let item = store.find_product(query).unwrap();
        OrderLine {
            product_id: item.product_id,
            name: item.name,
            category: item.category,
            price: item.price,
            border: None,
            additions: Vec::new(),
        }
    }

    #[test]
    fn test_find_product() {
        let store = Store::demo();
        assert_eq!(store.find_product("calabresa").unwrap().product_id, "pz-calabresa");
        assert_eq!(store.find_product("pz-margherita").unwrap().name, "Margherita");
        assert_eq!(store.find_product("guaraná").unwrap().category, "drink");
        assert!(store.find_product("sushi").is_none());
        assert!(store.find_product("  ").is_none());
    }

    #[test]
    fn test_menu_filter() {
        let store = Store::demo();
        assert_eq!(store.menu(Some("drink")).len(), 2);
        assert_eq!(store.menu(None).len(), 7);
    }

    #[test]
    fn test_upsert_keeps_fields() {
        let store = Store::demo();
        store.upsert_customer("u1", Some("Ana".into()), None, None);
        let record = store.upsert_customer("u1", None, None, Some("Rua A, 10".into()));
        assert_eq!(record.name.as_deref(), Some("Ana"));
        assert_eq!(record.address.as_deref(), Some("Rua A, 10"));
    }

    #[test]
    fn test_order_lifecycle() {
        let store = Store::demo();
        let order = store.create_order("u1");
        assert!(store.advance_order(&order.order_id, OrderStatus::Confirmed).is_err());

        store.put_line(&order.order_id, line(&store, "calabresa")).unwrap();
        let mut custom = line(&store, "calabresa");
        custom.border = Some("catupiry".into());
        store.put_line(&order.order_id, custom).unwrap();
        let stored = store.order(&order.order_id).unwrap();
        assert_eq!(stored.items.len(), 1);
        assert_eq!(stored.items[0].border.as_deref(), Some("catupiry"));

        assert!(store.advance_order(&order.order_id, OrderStatus::Finalized).is_err());
        store.advance_order(&order.order_id, OrderStatus::Confirmed).unwrap();
        store.advance_order(&order.order_id, OrderStatus::Finalized).unwrap();
        assert!(store.active_order("u1").is_none());
        assert!(store.put_line(&order.order_id, line(&store, "margherita")).is_err());
    }

    #[test]
    fn test_remove_line() {
        let store = Store::demo();
        let order = store.create_order("u1");
        store.put_line(&order.order_id, line(&store, "margherita")).unwrap();
        assert!(store.remove_line(&order.order_id, "pz-calabresa").is_err());
        store.remove_line(&order.order_id, "pz-margherita").unwrap();
        assert!(store.order(&order.order_id).unwrap().items.is_empty());
    }
}
