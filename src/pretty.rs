//! Human readable rendering of nanosecond counts
//!
//! The count is printed in full and a decimal point is inserted to express
//! it in the largest unit (ns, us, ms, s) that the value reaches:
//! `1500` becomes `1.500us`, `1234000` becomes `1.234000ms`.

use std::time::Duration;

const UNITS: [&str; 4] = ["ns", "us", "ms", "s"];

/// Render `ns` with its unit suffix
pub fn pretty_print(ns: u128) -> String {
    let mut unit = 0;
    let mut rest = ns;
    while unit < UNITS.len() - 1 {
        rest /= 1000;
        if rest == 0 {
            break;
        }
        unit += 1;
    }

    let mut out = ns.to_string();
    if unit > 0 {
        out.insert(out.len() - 3 * unit, '.');
    }
    out.push_str(UNITS[unit]);
    out
}

/// Render a [`Duration`] with [`pretty_print`]
pub fn pretty_duration(elapsed: Duration) -> String {
    pretty_print(elapsed.as_nanos())
}

/// Recover the nanosecond count from a string produced by [`pretty_print`]
pub fn parse_pretty(text: &str) -> Option<u128> {
    // "s" is a suffix of every other unit, so it has to be tried last
    let (unit, digits) = UNITS
        .iter()
        .enumerate()
        .find_map(|(unit, suffix)| text.strip_suffix(suffix).map(|d| (unit, d)))?;

    match digits.split_once('.') {
        Some((int, frac)) if unit > 0 && frac.len() == 3 * unit => {
            format!("{int}{frac}").parse().ok()
        }
        None if unit == 0 => digits.parse().ok(),
        _ => None,
    }
}
