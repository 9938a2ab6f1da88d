//! Check execution core (C7): schedule, retry, and run the actions of a
//! check; update per-check state; emit records.

use crate::error::Result;
use crate::model::RetrySettings;
use crate::record::hash_result_rows;
use crate::registry::ProviderInstance;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Destination for a materialized record batch (implemented by `sapmon-sink`).
pub trait RecordSink: Send + Sync {
    /// Sign and submit `records` under `custom_log`, tagging the event
    /// timestamp column as `col_time_generated`.
    fn submit(&self, custom_log: &str, records: &[Value], col_time_generated: &str) -> Result<()>;
}

/// Run every due, enabled check of `instance` once.
///
/// Sink failures and per-action failures are logged and do not abort the
/// instance's run; they're returned so the caller can decide whether to
/// surface them (`monitor` logs and continues; tests can assert on them).
pub fn run_instance(
    instance: &mut dyn ProviderInstance,
    sink: &dyn RecordSink,
    customer_sink: Option<&dyn RecordSink>,
    enable_customer_analytics: bool,
    sapmon_version: &str,
    now: DateTime<Utc>,
) -> Vec<crate::error::SapmonError> {
    let mut errors = Vec::new();
    let retry_settings = instance.retry_settings();
    let full_name = instance.full_name();

    // Checks own their ProviderCheck objects inside `instance`; running an
    // action needs `&mut dyn ProviderInstance` and `&mut dyn ProviderCheck`
    // at once, so the check list is taken out for the duration of the run.
    let mut checks = std::mem::take(instance.checks_mut());

    for check in checks.iter_mut() {
        if !check.state().is_enabled {
            continue;
        }
        let is_due = match check.state().last_run_local {
            None => true,
            Some(last) => last + chrono::Duration::seconds(check.spec().frequency_secs as i64) <= now,
        };
        if !is_due {
            continue;
        }

        let mut action_failed = false;
        for action in &check.spec().actions.clone() {
            let settings = RetrySettings::resolve(retry_settings, action);
            match run_action_with_retry(check.as_mut(), instance, action, settings) {
                Ok(()) => {}
                Err(err) => {
                    warn!(check = %check.name(), action = %action.action_type, error = %err, "action failed after retries, skipping remaining actions of this check");
                    errors.push(err);
                    action_failed = true;
                    break;
                }
            }
        }
        let _ = action_failed;

        let batch = match check.generate_records(instance, sapmon_version) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(check = %check.name(), error = %err, "record generation failed");
                errors.push(err);
                continue;
            }
        };

        if let Err(err) = sink.submit(&check.spec().custom_log, &batch.records, &batch.col_time_generated) {
            warn!(check = %check.name(), error = %err, "sink ingest failed, continuing to next check");
            errors.push(err);
        } else {
            info!(check = %check.name(), instance = %full_name, count = batch.records.len(), "submitted records");
        }

        if enable_customer_analytics && check.spec().include_in_customer_analytics {
            if let Some(customer_sink) = customer_sink {
                if let Err(err) = customer_sink.submit(&check.spec().custom_log, &batch.records, &batch.col_time_generated) {
                    warn!(check = %check.name(), error = %err, "customer analytics sink ingest failed");
                    errors.push(err);
                }
            }
        }

        update_check_state(check.as_mut(), &batch.records, now);
    }

    *instance.checks_mut() = checks;
    errors
}

fn run_action_with_retry(
    check: &mut dyn crate::registry::ProviderCheck,
    instance: &mut dyn ProviderInstance,
    action: &crate::model::Action,
    settings: RetrySettings,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        match check.run_action(instance, action) {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempt >= settings.retries {
                    return Err(err);
                }
                attempt += 1;
                let delay = settings.delay_for_retry(attempt);
                warn!(action = %action.action_type, attempt, delay_secs = delay.as_secs_f64(), error = %err, "action attempt failed, retrying");
                std::thread::sleep(delay);
            }
        }
    }
}

/// Generic state update after a check's actions complete successfully.
fn update_check_state(check: &mut dyn crate::registry::ProviderCheck, records: &[Value], now: DateTime<Utc>) {
    let rows: Vec<&Map<String, Value>> = records.iter().filter_map(Value::as_object).collect();

    let last_run_local = rows
        .first()
        .and_then(|row| row.get("_LOCAL_UTC"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    let last_run_server = rows
        .last()
        .and_then(|row| row.get("_TIMESERIES_UTC"))
        .or_else(|| rows.first().and_then(|row| row.get("_SERVER_UTC")))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let owned_rows: Vec<Map<String, Value>> = rows.into_iter().cloned().collect();
    let hash = hash_result_rows(&owned_rows);

    let state = check.state_mut();
    state.last_run_local = Some(last_run_local);
    if last_run_server.is_some() {
        state.last_run_server = last_run_server;
    }
    state.last_result_hash = Some(hash);
}
