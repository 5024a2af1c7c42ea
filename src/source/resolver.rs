use async_trait::async_trait;
use tracing::warn;

use crate::source::ItemResolver;

/// Resolver for deployments without an item database: every id stays unknown.
pub struct UnknownItems;

#[async_trait]
impl ItemResolver for UnknownItems {
    async fn resolve(&self, _base_name: &str, _slots: Option<u8>) -> Option<i64> {
        None
    }
}

/// Exact, case-insensitive name lookup against the `items` table.
pub struct SqliteItemResolver {
    pool: sqlx::SqlitePool,
}

impl SqliteItemResolver {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemResolver for SqliteItemResolver {
    async fn resolve(&self, base_name: &str, slots: Option<u8>) -> Option<i64> {
        let name = strip_slot_marker(base_name);
        // Prefer the exact slot variant, then any variant of the name.
        let res: Result<Option<i64>, sqlx::Error> = sqlx::query_scalar(
            r#"
            SELECT item_id FROM items
            WHERE name = ? COLLATE NOCASE
            ORDER BY (slots = ?) DESC, slots ASC
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(i64::from(slots.unwrap_or(0)))
        .fetch_optional(&self.pool)
        .await;

        match res {
            Ok(id) => id.filter(|id| *id > 0),
            Err(e) => {
                warn!(base_name, "Item lookup failed: {e}");
                None
            }
        }
    }
}

/// `Blade [3]` → `Blade`.
fn strip_slot_marker(base: &str) -> &str {
    match base.strip_suffix(']').and_then(|s| s.rfind('[')) {
        Some(open) => base[..open].trim_end(),
        None => base,
    }
}
