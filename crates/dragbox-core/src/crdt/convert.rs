//! Conversion between geometry values and Loro values.

use kurbo::Point;
use loro::{LoroMapValue, LoroValue};
use std::collections::HashMap;

const KEY_X: &str = "x";
const KEY_Y: &str = "y";

// LoroMapValue derefs to HashMap<String, LoroValue>
fn get_double(map: &LoroMapValue, key: &str) -> Option<f64> {
    match map.get(key)? {
        LoroValue::Double(d) => Some(*d),
        LoroValue::I64(i) => Some(*i as f64),
        _ => None,
    }
}

/// Encode a point as a single Loro map value so it is replaced atomically.
pub fn point_to_loro(point: Point) -> LoroValue {
    let mut map: HashMap<String, LoroValue> = HashMap::with_capacity(2);
    map.insert(KEY_X.to_string(), LoroValue::Double(point.x));
    map.insert(KEY_Y.to_string(), LoroValue::Double(point.y));
    LoroValue::from(map)
}

/// Decode a point, rejecting anything that is not an `{x, y}` map of finite numbers.
pub fn point_from_loro(value: &LoroValue) -> Option<Point> {
    let LoroValue::Map(map) = value else {
        return None;
    };
    let x = get_double(map, KEY_X)?;
    let y = get_double(map, KEY_Y)?;
    (x.is_finite() && y.is_finite()).then(|| Point::new(x, y))
}
