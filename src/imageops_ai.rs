pub mod alpha_composite;
pub mod mask;

pub use alpha_composite::AlphaComposite;
pub use mask::{argmax_mask, resize_mask};

use num_traits::{Bounded, NumCast};
use std::any::TypeId;

pub fn is_floating_point<T: 'static>() -> bool {
    let id = TypeId::of::<T>();
    id == TypeId::of::<f32>() || id == TypeId::of::<f64>()
}

pub fn get_max_value<T: Bounded + NumCast + 'static>() -> T {
    if is_floating_point::<T>() {
        T::from(1.0).unwrap_or_else(T::max_value)
    } else {
        T::max_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_value_per_subpixel_type() {
        assert_eq!(get_max_value::<u8>(), u8::MAX);
        assert_eq!(get_max_value::<u16>(), u16::MAX);
        assert_eq!(get_max_value::<f32>(), 1.0);
        assert_eq!(get_max_value::<f64>(), 1.0);
        assert!(!is_floating_point::<u16>());
    }
}
