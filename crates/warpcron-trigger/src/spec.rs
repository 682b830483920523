//! Cron spec string parsing.
//!
//! Input is a standard 5-field expression (`min hour dom month dow`),
//! optionally prefixed with `CRON_TZ=<zone> ` (or `TZ=<zone> `), or one of
//! the `@hourly`-style descriptors. The `cron` crate wants a leading seconds
//! field and numbers weekdays 1-7 from Sunday, so 5-field input is rewritten
//! before parsing.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::{TriggerError, TriggerResult};

/// A validated spec, ready to compute fire times.
///
/// When both day-of-month and day-of-week are restricted, standard cron
/// fires on days matching *either* field, while the `cron` crate requires
/// both. Such specs are split into one schedule per day field and the
/// earlier occurrence wins.
#[derive(Debug, Clone)]
pub struct ParsedSpec {
    schedules: Vec<Schedule>,
    pub timezone: Tz,
}

impl ParsedSpec {
    /// First occurrence strictly after `now`, evaluated in its timezone.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = now.with_timezone(&self.timezone);
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&local).next())
            .min()
            .map(|t| t.with_timezone(&Utc))
    }
}

pub fn parse_spec(spec: &str) -> TriggerResult<ParsedSpec> {
    let invalid = |reason: String| TriggerError::InvalidExpression {
        spec: spec.to_string(),
        reason,
    };

    let trimmed = spec.trim();
    let (timezone, expr) = split_timezone(trimmed)?;
    if expr.is_empty() {
        return Err(invalid("empty expression".to_string()));
    }

    let exprs = if expr.starts_with('@') {
        vec![expr.to_string()]
    } else {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields[..] else {
            return Err(invalid(format!("expected 5 fields, got {}", fields.len())));
        };
        let both_restricted = is_restricted(dom) && is_restricted(dow);
        let dow = translate_weekdays(dow).map_err(invalid)?;
        if both_restricted {
            vec![
                format!("0 {minute} {hour} {dom} {month} *"),
                format!("0 {minute} {hour} * {month} {dow}"),
            ]
        } else {
            vec![format!("0 {minute} {hour} {dom} {month} {dow}")]
        }
    };

    let schedules = exprs
        .iter()
        .map(|expr| Schedule::from_str(expr).map_err(|e| invalid(e.to_string())))
        .collect::<TriggerResult<Vec<_>>>()?;
    Ok(ParsedSpec {
        schedules,
        timezone,
    })
}

/// A day field limits the days a spec fires on unless it is a bare wildcard.
fn is_restricted(field: &str) -> bool {
    !matches!(field, "*" | "?" | "*/1")
}

/// An empty zone (`CRON_TZ= 0 7 * * *`) means UTC.
fn split_timezone(spec: &str) -> TriggerResult<(Tz, &str)> {
    let Some(rest) = spec
        .strip_prefix("CRON_TZ=")
        .or_else(|| spec.strip_prefix("TZ="))
    else {
        return Ok((Tz::UTC, spec));
    };
    let (zone, expr) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    if zone.is_empty() {
        return Ok((Tz::UTC, expr.trim()));
    }
    let timezone = zone
        .parse::<Tz>()
        .map_err(|_| TriggerError::UnknownTimezone(zone.to_string()))?;
    Ok((timezone, expr.trim()))
}

/// Rewrite a standard weekday field (0-7, Sunday = 0 or 7) into the
/// `cron` crate's numbering (1-7, Sunday = 1).
///
/// Numeric items are expanded into an explicit list; named items
/// (`MON-FRI`) pass through untouched since both conventions agree on names.
fn translate_weekdays(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut named = Vec::new();
    let mut days = BTreeSet::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid weekday step {step:?}"))?;
                if step == 0 {
                    return Err("weekday step must be positive".to_string());
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let bounds = if range == "*" {
            Some((0, 6))
        } else if let Some((lo, hi)) = range.split_once('-') {
            lo.parse::<u32>().ok().zip(hi.parse::<u32>().ok())
        } else {
            range
                .parse::<u32>()
                .ok()
                .map(|n| if step.is_some() { (n, n.max(6)) } else { (n, n) })
        };

        let Some((lo, hi)) = bounds else {
            if range.chars().any(|c| c.is_ascii_alphabetic()) {
                named.push(item.to_string());
                continue;
            }
            return Err(format!("invalid weekday item {item:?}"));
        };

        if hi > 7 || lo > hi {
            return Err(format!("weekday range {item:?} out of bounds"));
        }
        for day in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            days.insert(day % 7 + 1);
        }
    }

    let mut parts = named;
    parts.extend(days.iter().map(u32::to_string));
    if parts.is_empty() {
        return Err(format!("weekday field {field:?} selects no days"));
    }
    Ok(parts.join(","))
}
