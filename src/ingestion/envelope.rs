//! Envelope validation and normalization (§4.1 steps 1, 3, 4, 6).

use chrono::{DateTime, Duration, Utc};

use crate::errors::ValidationError;
use crate::models::{new_id, Envelope, Event, Metric, NormalizedEvent};

pub fn validate_schema(envelope: &Envelope, accepted_majors: &[u32]) -> Result<(), ValidationError> {
    let major = envelope
        .schema_version
        .split('.')
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| {
            ValidationError::SchemaInvalid(format!(
                "unparseable schema_version: {}",
                envelope.schema_version
            ))
        })?;
    if !accepted_majors.contains(&major) {
        return Err(ValidationError::SchemaInvalid(format!(
            "schema major {major} not in accepted set {accepted_majors:?}"
        )));
    }
    if envelope.event_id.is_empty()
        || envelope.idempotency_key.is_empty()
        || envelope.trace_id.is_empty()
        || envelope.actor_context.is_empty()
    {
        return Err(ValidationError::SchemaInvalid(
            "mandatory envelope field empty".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_skew(
    event_source_ts: DateTime<Utc>,
    now: DateTime<Utc>,
    skew_past: Duration,
    skew_future: Duration,
) -> Result<(), ValidationError> {
    let delta = now - event_source_ts;
    if delta > skew_past {
        return Err(ValidationError::LateEvent(format!(
            "event_source_ts {event_source_ts} is {delta} in the past, beyond {skew_past}"
        )));
    }
    if delta < -skew_future {
        return Err(ValidationError::LateEvent(format!(
            "event_source_ts {event_source_ts} is {} in the future, beyond {skew_future}",
            -delta
        )));
    }
    Ok(())
}

/// True if an `Event`-category payload's metadata carries a `severity`
/// key. Severity is a cycle output, never a raw-fact field — callers treat
/// this as fatal via `guards::forbid_severity_at_ingestion`, not as an
/// ordinary quarantine reason.
pub fn carries_severity_field(normalized: &NormalizedEvent) -> bool {
    match normalized {
        NormalizedEvent::Event { metadata, .. } => metadata.contains_key("severity"),
        NormalizedEvent::Metric { .. } => false,
    }
}

pub fn validate_category(normalized: &NormalizedEvent) -> Result<(), ValidationError> {
    match normalized {
        NormalizedEvent::Event { event_type, .. } => {
            if event_type.is_empty() {
                return Err(ValidationError::CategoryInvalid(
                    "event payload has empty type".to_string(),
                ));
            }
        }
        NormalizedEvent::Metric { value, .. } => {
            if !value.is_finite() {
                return Err(ValidationError::CategoryInvalid(
                    "metric payload value is not a finite number".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Produces the Event (and, for a metric payload, the paired Metric) that
/// gets appended to the Observation Store. `observed_at` is stamped at
/// receipt time, never taken from the envelope.
pub fn normalize(envelope: &Envelope, observed_at: DateTime<Utc>) -> (Event, Option<Metric>) {
    match &envelope.normalized_event {
        NormalizedEvent::Event {
            event_type,
            workflow_id,
            actor,
            resource,
            metadata,
        } => {
            let event = Event {
                event_id: envelope.event_id.clone(),
                event_type: event_type.clone(),
                workflow_id: workflow_id.clone(),
                actor: actor.clone(),
                resource: resource.clone(),
                timestamp: envelope.event_source_ts,
                metadata: metadata.clone(),
                observed_at,
            };
            (event, None)
        }
        NormalizedEvent::Metric {
            resource_id,
            metric_name,
            value,
        } => {
            let event = Event {
                event_id: envelope.event_id.clone(),
                event_type: format!("METRIC_{}", metric_name.to_uppercase()),
                workflow_id: None,
                actor: envelope.actor_context.clone(),
                resource: Some(resource_id.clone()),
                timestamp: envelope.event_source_ts,
                metadata: std::collections::HashMap::new(),
                observed_at,
            };
            let metric = Metric {
                metric_id: new_id("met"),
                resource_id: resource_id.clone(),
                metric_name: metric_name.clone(),
                value: *value,
                timestamp: envelope.event_source_ts,
                observed_at,
            };
            (event, Some(metric))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnterpriseContext, SourceSignature};
    use std::collections::HashMap;

    fn base_envelope(normalized_event: NormalizedEvent) -> Envelope {
        Envelope {
            schema_version: "1.0".into(),
            event_id: "e1".into(),
            idempotency_key: "k1".into(),
            trace_id: "t1".into(),
            event_source_ts: Utc::now(),
            enterprise_context: EnterpriseContext {
                org: "acme".into(),
                project: "payments".into(),
                env: "prod".into(),
                deployment_id: None,
            },
            actor_context: "svc_bot".into(),
            source_signature: SourceSignature {
                tool_name: "scanner".into(),
                tool_type: "static".into(),
            },
            normalized_event,
        }
    }

    #[test]
    fn validate_schema_rejects_unaccepted_major() {
        let envelope = base_envelope(NormalizedEvent::Event {
            event_type: "ACCESS_WRITE".into(),
            workflow_id: None,
            actor: "a".into(),
            resource: None,
            metadata: HashMap::new(),
        });
        assert!(validate_schema(&envelope, &[1]).is_ok());
        assert!(validate_schema(&envelope, &[2]).is_err());
    }

    #[test]
    fn validate_skew_rejects_stale_past() {
        let now = Utc::now();
        let stale = now - Duration::hours(48);
        assert!(validate_skew(stale, now, Duration::hours(24), Duration::minutes(5)).is_err());
        assert!(validate_skew(now, now, Duration::hours(24), Duration::minutes(5)).is_ok());
    }

    #[test]
    fn validate_category_rejects_empty_event_type() {
        let empty_type = NormalizedEvent::Event {
            event_type: "".into(),
            workflow_id: None,
            actor: "a".into(),
            resource: None,
            metadata: HashMap::new(),
        };
        assert!(validate_category(&empty_type).is_err());
    }

    #[test]
    fn carries_severity_field_detects_smuggled_key() {
        let mut metadata = HashMap::new();
        metadata.insert("severity".to_string(), serde_json::json!("HIGH"));
        let with_severity = NormalizedEvent::Event {
            event_type: "ACCESS_WRITE".into(),
            workflow_id: None,
            actor: "a".into(),
            resource: None,
            metadata,
        };
        assert!(carries_severity_field(&with_severity));

        let without_severity = NormalizedEvent::Event {
            event_type: "ACCESS_WRITE".into(),
            workflow_id: None,
            actor: "a".into(),
            resource: None,
            metadata: HashMap::new(),
        };
        assert!(!carries_severity_field(&without_severity));
    }

    #[test]
    fn normalize_metric_payload_yields_event_and_metric() {
        let envelope = base_envelope(NormalizedEvent::Metric {
            resource_id: "vm_2".into(),
            metric_name: "cpu_percent".into(),
            value: 93.0,
        });
        let (event, metric) = normalize(&envelope, Utc::now());
        assert_eq!(event.event_type, "METRIC_CPU_PERCENT");
        let metric = metric.unwrap();
        assert_eq!(metric.resource_id, "vm_2");
        assert_eq!(metric.value, 93.0);
    }
}
