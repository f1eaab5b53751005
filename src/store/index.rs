//! Windowed lookups over the in-memory event/metric buffers (C1). Both
//! buffers are populated strictly in append order and `observed_at` is
//! receipt time, so each buffer is already sorted — range queries use
//! `partition_point` rather than a secondary ordered structure.

use chrono::{DateTime, Utc};

use crate::models::{Event, Metric};

pub fn event_window<'a>(
    events: &'a [Event],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    event_type: Option<&str>,
    workflow_id: Option<&str>,
) -> Vec<&'a Event> {
    let start = events.partition_point(|e| e.observed_at < from);
    events[start..]
        .iter()
        .take_while(|e| e.observed_at <= to)
        .filter(|e| event_type.map_or(true, |t| e.event_type == t))
        .filter(|e| workflow_id.map_or(true, |w| e.workflow_id.as_deref() == Some(w)))
        .collect()
}

pub fn metric_window<'a>(
    metrics: &'a [Metric],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    resource_id: Option<&str>,
    metric_name: Option<&str>,
) -> Vec<&'a Metric> {
    let start = metrics.partition_point(|m| m.observed_at < from);
    metrics[start..]
        .iter()
        .take_while(|m| m.observed_at <= to)
        .filter(|m| resource_id.map_or(true, |r| m.resource_id == r))
        .filter(|m| metric_name.map_or(true, |n| m.metric_name == n))
        .collect()
}

pub fn recent<'a, T>(items: &'a [T], limit: usize) -> Vec<&'a T> {
    let start = items.len().saturating_sub(limit);
    items[start..].iter().collect()
}
