// Geohash cells and great-circle distance.
//
// A geohash interleaves longitude and latitude bisection bits (longitude
// first) and writes them five at a time in base32. Every extra character
// shrinks the cell, and points sharing a prefix share the prefix's cell,
// which lets the store answer "who is near here" with a prefix scan.

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Longest geohash this module will produce.
pub const MAX_PRECISION: usize = 12;

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Encode a coordinate at `precision` characters (clamped to 1..=12).
pub fn encode(lat: f64, lng: f64, precision: usize) -> String {
    let precision = precision.clamp(1, MAX_PRECISION);
    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lng_lo, mut lng_hi) = (-180.0_f64, 180.0_f64);
    let lat = lat.clamp(-90.0, 90.0);
    let lng = lng.clamp(-180.0, 180.0);

    let mut hash = String::with_capacity(precision);
    let mut even_bit = true;
    let mut bits = 0u8;
    let mut index = 0usize;

    while hash.len() < precision {
        if even_bit {
            let mid = (lng_lo + lng_hi) / 2.0;
            if lng >= mid {
                index = index * 2 + 1;
                lng_lo = mid;
            } else {
                index *= 2;
                lng_hi = mid;
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if lat >= mid {
                index = index * 2 + 1;
                lat_lo = mid;
            } else {
                index *= 2;
                lat_hi = mid;
            }
        }
        even_bit = !even_bit;

        bits += 1;
        if bits == 5 {
            hash.push(BASE32[index] as char);
            bits = 0;
            index = 0;
        }
    }
    hash
}

/// Bounding box of a geohash cell: (lat_min, lat_max, lng_min, lng_max).
/// None if the hash contains a character outside the alphabet.
pub fn decode_bounds(hash: &str) -> Option<(f64, f64, f64, f64)> {
    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lng_lo, mut lng_hi) = (-180.0_f64, 180.0_f64);
    let mut even_bit = true;

    for c in hash.bytes() {
        let value = BASE32.iter().position(|b| *b == c.to_ascii_lowercase())?;
        for shift in (0..5).rev() {
            let bit = (value >> shift) & 1 == 1;
            if even_bit {
                let mid = (lng_lo + lng_hi) / 2.0;
                if bit {
                    lng_lo = mid;
                } else {
                    lng_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if bit {
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            even_bit = !even_bit;
        }
    }
    Some((lat_lo, lat_hi, lng_lo, lng_hi))
}

/// The cell itself plus its (up to) eight neighbours, de-duplicated.
///
/// Longitude wraps around the antimeridian; rows beyond a pole are dropped.
pub fn cell_and_neighbors(hash: &str) -> Vec<String> {
    let Some((lat_lo, lat_hi, lng_lo, lng_hi)) = decode_bounds(hash) else {
        return Vec::new();
    };
    if hash.is_empty() {
        return vec![String::new()];
    }

    let lat_step = lat_hi - lat_lo;
    let lng_step = lng_hi - lng_lo;
    let center_lat = (lat_lo + lat_hi) / 2.0;
    let center_lng = (lng_lo + lng_hi) / 2.0;

    let mut cells = Vec::with_capacity(9);
    for dlat in [-1.0, 0.0, 1.0] {
        let lat = center_lat + dlat * lat_step;
        if !(-90.0..=90.0).contains(&lat) {
            continue;
        }
        for dlng in [-1.0, 0.0, 1.0] {
            let mut lng = center_lng + dlng * lng_step;
            if lng > 180.0 {
                lng -= 360.0;
            } else if lng < -180.0 {
                lng += 360.0;
            }
            let cell = encode(lat, lng, hash.len());
            if !cells.contains(&cell) {
                cells.push(cell);
            }
        }
    }
    cells
}

/// Cell height and width in meters at `precision`, measured at `lat`.
pub fn cell_size_m(precision: usize, lat: f64) -> (f64, f64) {
    let total_bits = 5 * precision as u32;
    let lng_bits = total_bits.div_ceil(2);
    let lat_bits = total_bits / 2;
    let height = 180.0 / 2f64.powi(lat_bits as i32) * METERS_PER_DEGREE;
    let width = 360.0 / 2f64.powi(lng_bits as i32) * METERS_PER_DEGREE * lat.to_radians().cos().abs();
    (height, width)
}

/// Longest prefix (at most `max_precision`) whose cell at `lat` is at least
/// `radius_m` in both directions, so the 3x3 block around a point covers
/// the whole radius. Zero means no prefix is coarse enough.
pub fn precision_for_radius(radius_m: f64, lat: f64, max_precision: usize) -> usize {
    (1..=max_precision.min(MAX_PRECISION))
        .rev()
        .find(|p| {
            let (h, w) = cell_size_m(*p, lat);
            h >= radius_m && w >= radius_m
        })
        .unwrap_or(0)
}

/// Great-circle distance in meters.
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}
