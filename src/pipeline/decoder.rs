//! glog INFO line decoder.
//!
//! A glog header carries month and day but no year, so the caller supplies
//! the year resolved for the file (see [`super::year`]).

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::patterns;

/// One decoded header + body. Consumed immediately by a classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLine {
    pub ts: NaiveDateTime,
    pub tid: u64,
    pub msg: String,
}

/// Decode a glog INFO line.
///
/// Returns `None` when the header does not match or the date/time fields are
/// out of range (e.g. `I0230`, a 7+ digit fraction).
pub fn decode_line(line: &str, year: i32) -> Option<DecodedLine> {
    let line = line.trim_end_matches(['\n', '\r']);
    let caps = patterns::glog_info_line().captures(line)?;

    let month: u32 = caps["mm"].parse().ok()?;
    let day: u32 = caps["dd"].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = parse_hms_fraction(&caps["hms"])?;
    let tid: u64 = caps["tid"].parse().ok()?;

    Some(DecodedLine {
        ts: NaiveDateTime::new(date, time),
        tid,
        msg: caps["msg"].to_string(),
    })
}

/// `HH:MM:SS.ffffff` with 1–6 fractional digits.
fn parse_hms_fraction(hms: &str) -> Option<NaiveTime> {
    let (clock, frac) = hms.split_once('.')?;
    if frac.is_empty() || frac.len() > 6 {
        return None;
    }

    let mut parts = clock.splitn(3, ':');
    let h: u32 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let s: u32 = parts.next()?.parse().ok()?;

    let digits: u32 = frac.parse().ok()?;
    let micros = digits * 10u32.pow(6 - frac.len() as u32);

    NaiveTime::from_hms_micro_opt(h, m, s, micros)
}
