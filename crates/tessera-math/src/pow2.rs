//! Power-of-two arithmetic on cell sizes.
//!
//! Quadtree node sizes are powers of two in cell units and may be fractional
//! (a half cell, a quarter cell) when chunks smaller than a cell are allowed.

/// Smallest power of two that is `>= value`. Values `<= 0` map to 1.
pub fn next_power_of_two(value: f32) -> f32 {
    if value <= 1.0 {
        // Fractional sizes still round up to the nearest power of two.
        let mut size = 1.0;
        if value <= 0.0 {
            return size;
        }
        while size * 0.5 >= value {
            size *= 0.5;
        }
        return size;
    }
    (value.ceil() as u32).next_power_of_two() as f32
}

/// True when `value` is a positive (possibly fractional) power of two.
pub fn is_power_of_two(value: f32) -> bool {
    if value.is_nan() || value <= 0.0 || value.is_infinite() {
        return false;
    }
    // Powers of two have an all-zero mantissa.
    value.to_bits() & 0x007f_ffff == 0
}

/// `floor(log2(value))` for integers, with `log2_floor(0) == 0`.
pub fn log2_floor(value: u32) -> u32 {
    if value == 0 { 0 } else { value.ilog2() }
}
