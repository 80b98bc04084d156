//! Conversions between chrono timestamps and Kubernetes `meta/v1.Time`.
//!
//! `Time` round-trips through its RFC 3339 wire form so the conversion does
//! not depend on which date library k8s-openapi is built with.

use crate::error::ControllerError;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Convert a chrono timestamp to a Kubernetes `Time` (second precision)
pub fn to_k8s_time(at: DateTime<Utc>) -> Result<Time, ControllerError> {
    let rfc3339 = at.to_rfc3339_opts(SecondsFormat::Secs, true);
    Ok(serde_json::from_value(serde_json::Value::String(rfc3339))?)
}

/// Convert a Kubernetes `Time` to a chrono timestamp
pub fn from_k8s_time(time: &Time) -> Option<DateTime<Utc>> {
    match serde_json::to_value(time).ok()? {
        serde_json::Value::String(rfc3339) => DateTime::parse_from_rfc3339(&rfc3339)
            .ok()
            .map(|at| at.with_timezone(&Utc)),
        _ => None,
    }
}
