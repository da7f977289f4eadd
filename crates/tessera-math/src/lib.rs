//! Bounding volumes, cell-space rectangles, and power-of-two helpers shared by the Tessera terrain crates.

mod aabb;
mod pow2;
mod rect;

pub use aabb::Aabb;
pub use pow2::{is_power_of_two, log2_floor, next_power_of_two};
pub use rect::Rect;
