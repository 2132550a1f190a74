//! Operator-facing operations over the identity store.

use crate::identity::{IdentityGenerator, ReservationError};
use crate::store::{IdentityStore, StoreError};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenListing {
    pub email: String,
    pub token: Option<String>,
    pub status: String,
}

/// Every stored identity with its token, `None` when the store is empty.
pub async fn stat(store: &dyn IdentityStore) -> Result<Option<Vec<TokenListing>>, StoreError> {
    let addresses = store.list().await?;
    if addresses.is_empty() {
        return Ok(None);
    }

    let mut listing = Vec::with_capacity(addresses.len());
    for email in addresses {
        // A key can vanish between list() and get() on a shared backend
        let Some(record) = store.get(&email).await? else {
            continue;
        };
        listing.push(TokenListing {
            token: record.token().map(str::to_string),
            status: record.status_name().to_string(),
            email,
        });
    }
    Ok(Some(listing))
}

pub async fn generate_one(
    generator: &IdentityGenerator,
    store: &dyn IdentityStore,
) -> Result<String, ReservationError> {
    generator.reserve(store).await
}

pub async fn generate_many(
    generator: &IdentityGenerator,
    store: &dyn IdentityStore,
    count: usize,
) -> Result<Vec<String>, StoreError> {
    generator.reserve_many(store, count).await
}
