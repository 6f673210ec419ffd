//! Hold Grid
//!
//! Turns raw catalog rows into an addressable grid of bolt-on holds.
//! A grid only exists if the bolt-on holds span exactly the expected
//! number of distinct columns and rows.

use crate::domain::models::{HoldLocation, HoldType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};

/// Distinct x positions of bolt-on holds on the board
pub const BOLT_ON_WIDTH: usize = 23;
/// Distinct y positions of bolt-on holds on the board
pub const BOLT_ON_HEIGHT: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => f.write_str("x"),
            Self::Y => f.write_str("y"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("grid dimension mismatch on {axis} axis: found {found} distinct values, expected {expected}")]
    DimensionMismatch {
        axis: Axis,
        found: usize,
        expected: usize,
    },
}

/// How a grid coordinate maps to an index into the sorted holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridIndexing {
    /// `y * width + x`
    #[default]
    RowMajor,
    /// `x + x * y`, as shipped in the first Android build. Skews every row
    /// after the first; kept so it can be checked against real boards.
    Legacy,
}

impl GridIndexing {
    fn index(self, x: usize, y: usize, width: usize) -> usize {
        match self {
            Self::RowMajor => y * width + x,
            Self::Legacy => x + x * y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDimensions {
    pub width: usize,
    pub height: usize,
}

impl Default for GridDimensions {
    fn default() -> Self {
        Self {
            width: BOLT_ON_WIDTH,
            height: BOLT_ON_HEIGHT,
        }
    }
}

/// Validated, immutable grid of bolt-on holds sorted by `(y, x)`
#[derive(Debug, Clone)]
pub struct HoldGrid {
    holds: Vec<HoldLocation>,
    dimensions: GridDimensions,
    indexing: GridIndexing,
}

impl HoldGrid {
    /// Build a grid from catalog rows.
    ///
    /// Non bolt-on rows are dropped. Fails if the remaining holds do not
    /// cover exactly `dimensions.width` distinct x values and
    /// `dimensions.height` distinct y values.
    pub fn build<I>(
        rows: I,
        dimensions: GridDimensions,
        indexing: GridIndexing,
    ) -> Result<Self, GridError>
    where
        I: IntoIterator<Item = HoldLocation>,
    {
        let mut holds: Vec<HoldLocation> = rows
            .into_iter()
            .filter(|loc| loc.hold_type == HoldType::BoltOn)
            .collect();

        let xs: BTreeSet<i32> = holds.iter().map(|loc| loc.x).collect();
        let ys: BTreeSet<i32> = holds.iter().map(|loc| loc.y).collect();

        if xs.len() != dimensions.width {
            error!(
                "Expected another X dim, got: {} expected: {}",
                xs.len(),
                dimensions.width
            );
            return Err(GridError::DimensionMismatch {
                axis: Axis::X,
                found: xs.len(),
                expected: dimensions.width,
            });
        }
        if ys.len() != dimensions.height {
            error!(
                "Expected another Y dim, got: {} expected: {}",
                ys.len(),
                dimensions.height
            );
            return Err(GridError::DimensionMismatch {
                axis: Axis::Y,
                found: ys.len(),
                expected: dimensions.height,
            });
        }

        holds.sort_by_key(|loc| (loc.y, loc.x));
        debug!(
            "Built {}x{} hold grid with {} bolt-ons",
            dimensions.width,
            dimensions.height,
            holds.len()
        );

        Ok(Self {
            holds,
            dimensions,
            indexing,
        })
    }

    /// Resolve a grid coordinate to a hold.
    ///
    /// Returns `None` when the coordinate is off the grid or the index
    /// lands past the last hold.
    pub fn lookup(&self, x: i32, y: i32) -> Option<&HoldLocation> {
        let x = usize::try_from(x).ok()?;
        let y = usize::try_from(y).ok()?;
        if x >= self.dimensions.width || y >= self.dimensions.height {
            return None;
        }
        self.holds
            .get(self.indexing.index(x, y, self.dimensions.width))
    }

    /// Every target in `(y, x)` order
    pub fn all_targets(&self) -> &[HoldLocation] {
        &self.holds
    }

    pub fn dimensions(&self) -> GridDimensions {
        self.dimensions
    }

    pub fn indexing(&self) -> GridIndexing {
        self.indexing
    }

    pub fn len(&self) -> usize {
        self.holds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }
}
