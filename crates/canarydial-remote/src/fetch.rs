//! The fetch-and-parse protocol for canary rollout records.
//!
//! One refresh attempt is a strongly-consistent point lookup followed by
//! strict parsing of the `rollout` field. Every way an attempt can fail is
//! classified in [`FetchError`]; none of them is fatal to the refresh loop.

use thiserror::Error;

use canarydial_store::{KeyField, PointLookup, RecordStore, StoreError};

/// Partition key field holding the application identifier.
const PARTITION_FIELD: &str = "application";
/// Range key field; canary records always use the literal `"canary"`.
const RANGE_FIELD: &str = "version";
const RANGE_VALUE: &str = "canary";
/// Field holding the rollout fraction.
const ROLLOUT_FIELD: &str = "rollout";

/// Why a single refresh attempt failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not fetch rollout record: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("\"rollout\" field missing from response")]
    MissingField,

    #[error("rollout value is not stored as a number")]
    WrongType,

    #[error("could not parse rollout value as a number: {0:?}")]
    UnparseableNumber(String),

    #[error("rollout value {0} is outside the [0.0, 1.0] range")]
    OutOfRange(f64),
}

/// Build the point lookup for an application's canary record.
pub(crate) fn canary_lookup(table: &str, application: &str) -> PointLookup {
    PointLookup {
        table: table.to_string(),
        partition: KeyField::new(PARTITION_FIELD, application),
        range: KeyField::new(RANGE_FIELD, RANGE_VALUE),
        projection: vec![ROLLOUT_FIELD.to_string()],
        consistent: true,
    }
}

/// Perform one point lookup and parse the rollout fraction.
///
/// An out-of-range value is reported as a failure, never clamped.
pub(crate) async fn fetch_rollout(
    store: &dyn RecordStore,
    lookup: &PointLookup,
) -> Result<f64, FetchError> {
    let record = store.get_record(lookup).await?;
    let field = record
        .as_ref()
        .and_then(|r| r.field(ROLLOUT_FIELD))
        .ok_or(FetchError::MissingField)?;
    let raw = field.as_number().ok_or(FetchError::WrongType)?;
    let fraction: f64 = raw
        .parse()
        .map_err(|_| FetchError::UnparseableNumber(raw.to_string()))?;
    if !(0.0..=1.0).contains(&fraction) {
        return Err(FetchError::OutOfRange(fraction));
    }
    Ok(fraction)
}
