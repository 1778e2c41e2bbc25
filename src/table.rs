//! Row-table conventions shared by every pipeline stage.
//!
//! Each stage produces a `Vec` of a plain row struct. The struct declares its
//! column list so that an empty table still has a well-defined shape (CSV
//! header, schema tests). Ordering helpers here give NaN a fixed position so
//! that every sort in the pipeline is total and deterministic.

use std::cmp::Ordering;

/// A row type with a fixed, ordered column list.
///
/// The list must match the serialized field order of the row struct.
pub trait Columns {
    const COLUMNS: &'static [&'static str];
}

/// Ascending float order with NaN last.
pub fn cmp_f64_asc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Descending float order with NaN still last.
pub fn cmp_f64_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// `num / den`, NaN when either side is missing or the denominator is zero.
pub fn safe_ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 || den.is_nan() || num.is_nan() {
        f64::NAN
    } else {
        num / den
    }
}

/// Missing values become NaN for arithmetic.
pub fn or_nan(v: Option<f64>) -> f64 {
    v.unwrap_or(f64::NAN)
}

/// Milliseconds between two timestamps, as a float.
pub fn millis_between(later: chrono::NaiveDateTime, earlier: chrono::NaiveDateTime) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1000.0,
        None => delta.num_milliseconds() as f64,
    }
}

/// Ordered columns of a serialized row, read back through the CSV writer.
#[cfg(test)]
pub fn serialized_header<T: serde::Serialize>(row: &T) -> Vec<String> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(Vec::new());
    wtr.serialize(row).unwrap();
    let bytes = wtr.into_inner().unwrap();
    let text = String::from_utf8(bytes).unwrap();
    let header = text.lines().next().unwrap_or("");
    header.split(',').map(|s| s.to_string()).collect()
}
