//! Read-only SQLite hold catalog.

use crate::domain::models::{HoldLocation, HoldType};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Kilter Board Original
pub const DEFAULT_LAYOUT_ID: i64 = 1;
/// Kilter Board Original
pub const DEFAULT_PRODUCT_ID: i64 = 1;
/// 16x12 super wide
pub const DEFAULT_PRODUCT_SIZE_ID: i64 = 28;

const HOLD_LOCATIONS_SQL: &str = r#"
    SELECT holes.x, holes.y, leds.position, placements.id, placements.set_id
    FROM leds
    INNER JOIN holes ON leds.hole_id = holes.id
    INNER JOIN placements ON placements.hole_id = holes.id
    WHERE placements.layout_id = ?1
      AND leds.product_size_id = ?2
      AND holes.product_id = ?3
"#;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("led position {0} does not fit in 16 bits")]
    LedPositionOutOfRange(i64),
}

/// Source of hold rows for one board size
pub trait HoldCatalog {
    fn hold_locations(&self, product_size_id: i64) -> Result<Vec<HoldLocation>, CatalogError>;
}

/// Catalog backed by the board app database.
pub struct SqliteCatalog {
    conn: Connection,
    layout_id: i64,
    product_id: i64,
}

impl SqliteCatalog {
    /// Open an existing catalog file read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!("Opened hold catalog {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            layout_id: DEFAULT_LAYOUT_ID,
            product_id: DEFAULT_PRODUCT_ID,
        }
    }

    pub fn with_layout(mut self, layout_id: i64, product_id: i64) -> Self {
        self.layout_id = layout_id;
        self.product_id = product_id;
        self
    }
}

impl HoldCatalog for SqliteCatalog {
    fn hold_locations(&self, product_size_id: i64) -> Result<Vec<HoldLocation>, CatalogError> {
        let mut stmt = self.conn.prepare(HOLD_LOCATIONS_SQL)?;
        let rows = stmt.query_map(
            params![self.layout_id, product_size_id, self.product_id],
            |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )?;

        let mut results = Vec::new();
        for row in rows {
            let (x, y, position, placement_id, set_id) = row?;
            let led_position = u16::try_from(position)
                .map_err(|_| CatalogError::LedPositionOutOfRange(position))?;
            results.push(HoldLocation {
                x,
                y,
                led_position,
                placement_id,
                hold_type: HoldType::from_set_id(set_id),
            });
        }

        debug!(
            "Loaded {} hold locations for product size {}",
            results.len(),
            product_size_id
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> SqliteCatalog {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE holes (id INTEGER PRIMARY KEY, product_id INTEGER, x INTEGER, y INTEGER);
            CREATE TABLE leds (id INTEGER PRIMARY KEY, product_size_id INTEGER, hole_id INTEGER, position INTEGER);
            CREATE TABLE placements (id INTEGER PRIMARY KEY, layout_id INTEGER, hole_id INTEGER, set_id INTEGER);

            INSERT INTO holes VALUES (1, 1, 4, 8), (2, 1, 12, 8), (3, 1, 8, 12), (4, 7, 4, 8);
            INSERT INTO leds VALUES
                (10, 28, 1, 0),
                (11, 28, 2, 1),
                (12, 28, 3, 2),
                (13, 27, 1, 40),
                (14, 28, 4, 99);
            INSERT INTO placements VALUES
                (100, 1, 1, 1),
                (101, 1, 2, 1),
                (102, 1, 3, 20),
                (103, 2, 1, 1),
                (104, 1, 4, 1);
            "#,
        )
        .unwrap();
        SqliteCatalog::from_connection(conn)
    }

    #[test]
    fn test_query_hold_locations() {
        let catalog = seeded();
        let mut holds = catalog.hold_locations(DEFAULT_PRODUCT_SIZE_ID).unwrap();
        holds.sort_by_key(|h| h.placement_id);

        assert_eq!(
            holds,
            vec![
                HoldLocation {
                    x: 4,
                    y: 8,
                    led_position: 0,
                    placement_id: 100,
                    hold_type: HoldType::BoltOn,
                },
                HoldLocation {
                    x: 12,
                    y: 8,
                    led_position: 1,
                    placement_id: 101,
                    hold_type: HoldType::BoltOn,
                },
                HoldLocation {
                    x: 8,
                    y: 12,
                    led_position: 2,
                    placement_id: 102,
                    hold_type: HoldType::ScrewOn,
                },
            ]
        );
    }

    #[test]
    fn test_other_product_size() {
        let catalog = seeded();
        let holds = catalog.hold_locations(27).unwrap();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].led_position, 40);
    }

    #[test]
    fn test_other_layout() {
        let catalog = seeded().with_layout(2, 1);
        let holds = catalog.hold_locations(DEFAULT_PRODUCT_SIZE_ID).unwrap();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].placement_id, 103);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SqliteCatalog::open(dir.path().join("missing.db")).is_err());
    }
}
