//! Expiry-date normalization.
//!
//! Stock rows arrive from pharmacy bills with wildly inconsistent expiry
//! strings (`2026-08-01`, `Aug-26`, `15-08-2026`, `Aug 26`, …). This module
//! is the single parser every consumer goes through, so expiry comparisons
//! have one set of semantics across the ledger, the alert engine, and the
//! dispense-time check.

use chrono::{Datelike, NaiveDate};

use crate::error::AppError;

/// Ordered list of accepted formats. The bool marks month-year formats,
/// which resolve to the first day of the month.
const FORMATS: &[(&str, bool)] = &[
    ("%Y-%m-%d", false),
    ("%d-%m-%Y", false),
    ("%b-%y", true),
    ("%b-%Y", true),
    ("%d-%b-%Y", false),
    ("%m/%d/%Y", false),
    ("%Y/%m/%d", false),
];

/// Parse a raw expiry string into a calendar date.
///
/// Month-year inputs map to the first of the month. Two-digit years below
/// 1970 are shifted forward a century, so `Aug-26` is 2026, not 1926.
pub fn parse_expiry(text: &str) -> Result<NaiveDate, AppError> {
    let s = text.trim();
    if s.is_empty() {
        return Err(AppError::parse("empty expiry date"));
    }

    for (fmt, month_year) in FORMATS {
        let parsed = if *month_year {
            NaiveDate::parse_from_str(&format!("01-{}", s), &format!("%d-{}", fmt))
        } else {
            NaiveDate::parse_from_str(s, fmt)
        };
        if let Ok(date) = parsed {
            // The century rule only applies where the year was two digits.
            if *fmt == "%b-%y" {
                return Ok(apply_century_rule(date));
            }
            return Ok(date);
        }
    }

    // Fallback for strings like "Aug 26" or "Aug/26/whatever": retry the
    // first two tokens as Mon-YY.
    let normalized = s.replace(['/', ' '], "-");
    let mut tokens = normalized.split('-').filter(|t| !t.is_empty());
    if let (Some(month), Some(year)) = (tokens.next(), tokens.next()) {
        if let Ok(date) =
            NaiveDate::parse_from_str(&format!("01-{}-{}", month, year), "%d-%b-%y")
        {
            return Ok(apply_century_rule(date));
        }
    }

    Err(AppError::parse(format!("unrecognized date format: {}", s)))
}

/// Signed days from `today` until the expiry encoded in `raw`.
/// Negative means already expired.
pub fn days_until_expiry(raw: &str, today: NaiveDate) -> Result<i64, AppError> {
    let expiry = parse_expiry(raw)?;
    Ok((expiry - today).num_days())
}

fn apply_century_rule(date: NaiveDate) -> NaiveDate {
    if date.year() < 1970 {
        date.with_year(date.year() + 100).unwrap_or(date)
    } else {
        date
    }
}
