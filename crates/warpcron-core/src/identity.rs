//! Deterministic schedule identity.
//!
//! Two schedules with the same cron expression, timezone and set of config
//! pairs are the same schedule. The identity is
//! `"[<timezone> ]<cron>-<sha256 hex>"` where the digest covers the config
//! pairs serialized as a JSON list sorted by key. Sorting makes the result
//! independent of map iteration order.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::IdentityError;
use crate::types::ScheduleSpec;

/// Fingerprint of a schedule, used to detect "same schedule" across
/// reconciliation rounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleIdentity(String);

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ConfigPair<'a> {
    key: &'a str,
    value: &'a str,
}

impl ScheduleIdentity {
    /// Compute the identity of a schedule spec.
    pub fn of(spec: &ScheduleSpec) -> Result<Self, IdentityError> {
        let mut pairs: Vec<ConfigPair<'_>> = spec
            .config
            .iter()
            .map(|(key, value)| ConfigPair { key, value })
            .collect();
        pairs.sort_by(|a, b| a.key.cmp(b.key));

        let encoded = serde_json::to_vec(&pairs)?;
        let digest = hex::encode(Sha256::digest(&encoded));

        let cron = normalize_cron(&spec.cron);
        let prefixed = match &spec.timezone {
            Some(zone) => format!("{zone} {cron}"),
            None => cron,
        };

        Ok(Self(format!("{prefixed}-{digest}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScheduleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim and collapse internal whitespace so `"0  7 * * *"` and
/// `"0 7 * * *"` hash the same.
pub fn normalize_cron(cron: &str) -> String {
    cron.split_whitespace().collect::<Vec<_>>().join(" ")
}
