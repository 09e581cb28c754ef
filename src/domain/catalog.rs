//! In-memory product catalog standing in for the system of record.
//!
//! Every read bumps [`Catalog::source_reads`], which is how tests observe whether a request was
//! answered by the cache or reached the source.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;
use crate::cache::lock::{rw_read, rw_write};

const SOURCE: &str = "domain::catalog";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub price_cents: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInput {
    pub name: String,
    pub category: String,
    pub price_cents: u64,
}

impl ProductInput {
    fn validate(self) -> Result<Self, DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("product name must not be empty"));
        }
        if self.category.trim().is_empty() {
            return Err(DomainError::validation("product category must not be empty"));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: Uuid,
    pub quantity: u32,
}

/// Page of a product listing.
#[derive(Debug, Clone, Copy)]
pub struct ListQuery<'a> {
    pub category: Option<&'a str>,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Default)]
pub struct Catalog {
    products: RwLock<BTreeMap<Uuid, Product>>,
    carts: RwLock<HashMap<String, Vec<CartItem>>>,
    reads: AtomicU64,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog with a few products, used by `serve`.
    pub fn seeded() -> Self {
        let catalog = Self::new();
        for (name, category, price_cents) in [
            ("Mechanical keyboard", "peripherals", 12_900),
            ("Trackball", "peripherals", 7_450),
            ("USB-C dock", "accessories", 18_999),
            ("Monitor arm", "accessories", 6_500),
        ] {
            let input = ProductInput {
                name: name.to_string(),
                category: category.to_string(),
                price_cents,
            };
            // Seed data is static and valid.
            let _ = catalog.create(input);
        }
        catalog
    }

    /// Reads served by the catalog itself.
    pub fn source_reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn list(&self, query: ListQuery<'_>) -> Vec<Product> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let limit = query.limit.max(1);
        let skip = query.page.saturating_sub(1).saturating_mul(limit);
        rw_read(&self.products, SOURCE, "list")
            .values()
            .filter(|product| query.category.is_none_or(|category| product.category == category))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Result<Product, DomainError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        rw_read(&self.products, SOURCE, "get")
            .get(&id)
            .cloned()
            .ok_or(DomainError::not_found("product"))
    }

    pub fn create(&self, input: ProductInput) -> Result<Product, DomainError> {
        let input = input.validate()?;
        let product = Product {
            id: Uuid::new_v4(),
            name: input.name,
            category: input.category,
            price_cents: input.price_cents,
        };
        rw_write(&self.products, SOURCE, "create").insert(product.id, product.clone());
        Ok(product)
    }

    pub fn update(&self, id: Uuid, input: ProductInput) -> Result<Product, DomainError> {
        let input = input.validate()?;
        let mut products = rw_write(&self.products, SOURCE, "update");
        let product = products
            .get_mut(&id)
            .ok_or(DomainError::not_found("product"))?;
        product.name = input.name;
        product.category = input.category;
        product.price_cents = input.price_cents;
        Ok(product.clone())
    }

    pub fn delete(&self, id: Uuid) -> Result<(), DomainError> {
        rw_write(&self.products, SOURCE, "delete")
            .remove(&id)
            .map(|_| ())
            .ok_or(DomainError::not_found("product"))
    }

    pub fn cart(&self, user: &str) -> Vec<CartItem> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        rw_read(&self.carts, SOURCE, "cart")
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    /// Add `item` to the user's cart, merging quantities of the same product.
    pub fn add_to_cart(&self, user: &str, item: CartItem) -> Result<Vec<CartItem>, DomainError> {
        if item.quantity == 0 {
            return Err(DomainError::validation("quantity must be greater than zero"));
        }
        if !rw_read(&self.products, SOURCE, "add_to_cart.lookup").contains_key(&item.product_id) {
            return Err(DomainError::not_found("product"));
        }

        let mut carts = rw_write(&self.carts, SOURCE, "add_to_cart");
        let cart = carts.entry(user.to_string()).or_default();
        match cart
            .iter_mut()
            .find(|existing| existing.product_id == item.product_id)
        {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
            None => cart.push(item),
        }
        Ok(cart.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, category: &str) -> ProductInput {
        ProductInput {
            name: name.to_string(),
            category: category.to_string(),
            price_cents: 100,
        }
    }

    #[test]
    fn crud_roundtrip() {
        let catalog = Catalog::new();
        let created = catalog.create(input("Pen", "office")).expect("create");

        assert_eq!(catalog.get(created.id).expect("get"), created);

        let updated = catalog
            .update(created.id, input("Fountain pen", "office"))
            .expect("update");
        assert_eq!(updated.name, "Fountain pen");

        catalog.delete(created.id).expect("delete");
        assert!(matches!(
            catalog.get(created.id),
            Err(DomainError::NotFound { entity: "product" })
        ));
    }

    #[test]
    fn blank_names_are_rejected() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.create(input(" ", "office")),
            Err(DomainError::Validation { .. })
        ));
    }

    #[test]
    fn list_filters_and_pages() {
        let catalog = Catalog::seeded();
        let peripherals = catalog.list(ListQuery {
            category: Some("peripherals"),
            page: 1,
            limit: 10,
        });
        assert_eq!(peripherals.len(), 2);

        let second_page = catalog.list(ListQuery {
            category: None,
            page: 2,
            limit: 3,
        });
        assert_eq!(second_page.len(), 1);
        assert_eq!(catalog.source_reads(), 2);
    }

    #[test]
    fn carts_are_per_user_and_merge_quantities() {
        let catalog = Catalog::new();
        let product = catalog.create(input("Mug", "kitchen")).expect("create");
        let item = CartItem {
            product_id: product.id,
            quantity: 1,
        };

        catalog.add_to_cart("alice", item.clone()).expect("add");
        let cart = catalog.add_to_cart("alice", item).expect("add");

        assert_eq!(cart[0].quantity, 2);
        assert!(catalog.cart("bob").is_empty());
    }
}
