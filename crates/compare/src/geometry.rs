//! Rectangles, pixels and exclusion zone sets

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A pixel coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pixel {
    pub x: u32,
    pub y: u32,
}

impl Pixel {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl From<(u32, u32)> for Pixel {
    fn from((x, y): (u32, u32)) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle in image coordinates.
///
/// A rectangle may extend past the bounds of any image it is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether (x, y) lies inside the rectangle. Right and bottom edges are exclusive.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        // u64 so that x + width never overflows
        let (x, y) = (u64::from(x), u64::from(y));
        let (rx, ry) = (u64::from(self.x), u64::from(self.y));
        x >= rx && y >= ry && x < rx + u64::from(self.width) && y < ry + u64::from(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Rectangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for Rectangle {
    type Err = String;

    /// Parses `x,y,width,height`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected x,y,width,height, got '{}'", s));
        }

        let mut values = [0u32; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .map_err(|e| format!("invalid rectangle component '{}': {}", part, e))?;
        }

        Ok(Rectangle::new(values[0], values[1], values[2], values[3]))
    }
}

/// The rectangles within which pixel differences are ignored.
///
/// Zones declared on the reference and on the candidate are merged into one
/// set; origin does not matter once merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionZoneSet {
    zones: Vec<Rectangle>,
}

impl ExclusionZoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union of the zones owned by a reference and by a candidate
    pub fn union<'a>(
        reference: impl IntoIterator<Item = &'a Rectangle>,
        candidate: impl IntoIterator<Item = &'a Rectangle>,
    ) -> Self {
        reference.into_iter().chain(candidate).copied().collect()
    }

    pub fn push(&mut self, zone: Rectangle) {
        if !zone.is_empty() {
            self.zones.push(zone);
        }
    }

    pub fn excludes(&self, x: u32, y: u32) -> bool {
        self.zones.iter().any(|zone| zone.contains(x, y))
    }

    pub fn zones(&self) -> &[Rectangle] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

impl FromIterator<Rectangle> for ExclusionZoneSet {
    fn from_iter<I: IntoIterator<Item = Rectangle>>(iter: I) -> Self {
        let mut set = Self::new();
        for zone in iter {
            set.push(zone);
        }
        set
    }
}
