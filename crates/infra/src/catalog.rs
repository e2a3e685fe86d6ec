//! Product catalog boundary.
//!
//! The ledger only needs to know whether a product exists and is active; the
//! catalog itself lives elsewhere.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use stockledger_core::ProductId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("catalog unavailable: {0}")]
pub struct CatalogError(pub String);

#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    async fn is_active_product(&self, product_id: ProductId) -> Result<bool, CatalogError>;

    /// Every active product, for snapshot listings.
    async fn active_products(&self) -> Result<Vec<ProductId>, CatalogError>;
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, bool>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = ProductId>) -> Self {
        Self {
            products: RwLock::new(products.into_iter().map(|id| (id, true)).collect()),
        }
    }

    /// Register (or reactivate) a product.
    pub fn register(&self, product_id: ProductId) -> Result<(), CatalogError> {
        let mut map = self.products.write().map_err(|_| poisoned())?;
        map.insert(product_id, true);
        Ok(())
    }

    /// Returns `Ok(false)` if the product was never registered.
    pub fn deactivate(&self, product_id: ProductId) -> Result<bool, CatalogError> {
        let mut map = self.products.write().map_err(|_| poisoned())?;
        Ok(match map.get_mut(&product_id) {
            Some(active) => {
                *active = false;
                true
            }
            None => false,
        })
    }
}

fn poisoned() -> CatalogError {
    CatalogError("lock poisoned".to_string())
}

#[async_trait::async_trait]
impl Catalog for InMemoryCatalog {
    async fn is_active_product(&self, product_id: ProductId) -> Result<bool, CatalogError> {
        let map = self
            .products
            .read()
            .map_err(|_| poisoned())?;
        Ok(map.get(&product_id).copied().unwrap_or(false))
    }

    async fn active_products(&self) -> Result<Vec<ProductId>, CatalogError> {
        let map = self
            .products
            .read()
            .map_err(|_| poisoned())?;
        let mut active: Vec<_> = map
            .iter()
            .filter_map(|(id, active)| active.then_some(*id))
            .collect();
        active.sort();
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn registered_products_are_active_until_deactivated() {
        let product_id = ProductId::new();
        let catalog = InMemoryCatalog::with_products([product_id]);

        assert!(catalog.is_active_product(product_id).await.unwrap());
        assert!(!catalog.is_active_product(ProductId::new()).await.unwrap());

        assert!(catalog.deactivate(product_id).unwrap());
        assert!(!catalog.is_active_product(product_id).await.unwrap());
        assert!(catalog.active_products().await.unwrap().is_empty());
        assert!(!catalog.deactivate(ProductId::new()).unwrap());

        catalog.register(product_id).unwrap();
        assert_eq!(catalog.active_products().await.unwrap(), vec![product_id]);
    }

    #[tokio::test]
    async fn poisoned_lock_is_an_error_not_an_unknown_product() {
        let product_id = ProductId::new();
        let catalog = Arc::new(InMemoryCatalog::with_products([product_id]));

        let holder = Arc::clone(&catalog);
        let crashed = std::thread::spawn(move || {
            let _guard = holder.products.write().unwrap();
            panic!("writer crashed while holding the catalog lock");
        })
        .join();
        assert!(crashed.is_err());

        assert_eq!(catalog.deactivate(product_id), Err(poisoned()));
        assert_eq!(catalog.register(ProductId::new()), Err(poisoned()));
        assert!(catalog.is_active_product(product_id).await.is_err());
    }
}
