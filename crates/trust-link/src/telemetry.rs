//! Telemetry ingestion: variable map and bounded history.

#![allow(missing_docs)]

use std::collections::VecDeque;

use indexmap::IndexMap;
use serde::Serialize;
use smol_str::SmolStr;
use tracing::debug;

use crate::error::LinkError;
use crate::protocol::{InboundMessage, RuntimeStatus, VariableSample};
use crate::registry::ControllerId;

/// Default number of history records kept for charting.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Controller-namespaced key: `"<controller>:<path>"`.
#[must_use]
pub fn variable_key(controller: &ControllerId, path: &str) -> SmolStr {
    SmolStr::from(format!("{controller}:{path}"))
}

/// Latest samples reported under one path by one controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableEntry {
    pub controller: ControllerId,
    pub path: SmolStr,
    pub samples: Vec<VariableSample>,
    pub received_ms: u64,
}

/// Last-write-wins map of reported variables.
#[derive(Debug, Clone, Default)]
pub struct VariableMap {
    entries: IndexMap<SmolStr, VariableEntry>,
}

impl VariableMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup by full `"<controller>:<path>"` key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&VariableEntry> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn get_for(&self, controller: &ControllerId, path: &str) -> Option<&VariableEntry> {
        self.entries.get(variable_key(controller, path).as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SmolStr, &VariableEntry)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn merge(
        &mut self,
        controller: &ControllerId,
        path: &SmolStr,
        samples: Vec<VariableSample>,
        received_ms: u64,
    ) {
        self.entries.insert(
            variable_key(controller, path),
            VariableEntry {
                controller: controller.clone(),
                path: path.clone(),
                samples,
                received_ms,
            },
        );
    }

    /// Drop every entry owned by `controller`; returns how many were removed.
    pub fn clear_controller(&mut self, controller: &ControllerId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| &entry.controller != controller);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One timestamped chart point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub timestamp_ms: u64,
    pub values: IndexMap<SmolStr, f64>,
}

impl HistoryRecord {
    #[must_use]
    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }
}

/// FIFO ring of the most recent history records.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    limit: usize,
    records: VecDeque<HistoryRecord>,
    pushed: u64,
}

impl HistoryRing {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            records: VecDeque::with_capacity(limit),
            pushed: 0,
        }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Append a record; returns how many old records were evicted.
    pub fn push(&mut self, record: HistoryRecord) -> usize {
        self.records.push_back(record);
        self.pushed = self.pushed.saturating_add(1);
        let mut evicted = 0;
        while self.records.len() > self.limit {
            self.records.pop_front();
            evicted += 1;
        }
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.iter()
    }

    /// Records pushed since creation, including evicted ones.
    #[must_use]
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Records pushed after the first `seen` ones that are still retained.
    pub fn since(&self, seen: u64) -> impl Iterator<Item = &HistoryRecord> {
        let fresh = usize::try_from(self.pushed.saturating_sub(seen)).unwrap_or(usize::MAX);
        let skip = self.records.len().saturating_sub(fresh);
        self.records.iter().skip(skip)
    }

    #[must_use]
    pub fn latest(&self) -> Option<&HistoryRecord> {
        self.records.back()
    }

    /// `(timestamp, value)` points of one field, oldest first.
    #[must_use]
    pub fn series(&self, field: &str) -> Vec<(u64, f64)> {
        self.records
            .iter()
            .filter_map(|record| record.get(field).map(|value| (record.timestamp_ms, value)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

/// What one inbound message contributed.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestReport {
    Update {
        /// Paths merged into the variable map.
        paths: usize,
        /// Numeric samples that made it into the history record.
        numeric_fields: usize,
        status: Option<RuntimeStatus>,
    },
    Deployment {
        path: SmolStr,
    },
    Ignored,
}

/// Variable map plus history ring.
#[derive(Debug, Clone, Default)]
pub struct TelemetryStore {
    variables: VariableMap,
    history: HistoryRing,
}

impl TelemetryStore {
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            variables: VariableMap::new(),
            history: HistoryRing::new(history_limit),
        }
    }

    #[must_use]
    pub fn variables(&self) -> &VariableMap {
        &self.variables
    }

    #[must_use]
    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Drop the variable map entries of one controller.
    pub fn clear_controller(&mut self, controller: &ControllerId) -> usize {
        self.variables.clear_controller(controller)
    }

    /// Decode and apply one inbound text frame from `controller`.
    ///
    /// Decode failures are returned as `MalformedMessage` and leave the store
    /// untouched. Values that cannot be coerced to a number are skipped for
    /// the history record but still land in the variable map.
    pub fn ingest(
        &mut self,
        controller: &ControllerId,
        text: &str,
        now_ms: u64,
    ) -> Result<IngestReport, LinkError> {
        let message =
            InboundMessage::decode(text).map_err(|err| LinkError::MalformedMessage {
                controller: controller.as_smol_str().clone(),
                reason: err.to_string().into(),
            })?;
        match message {
            InboundMessage::Update { status, variables } => {
                let variables = variables.unwrap_or_default();
                let paths = variables.len();
                let mut values = IndexMap::new();
                for (path, samples) in variables {
                    for sample in &samples {
                        let Some(value) = sample.value.as_numeric() else {
                            continue;
                        };
                        values.insert(variable_key(controller, &sample.name), value);
                        values.insert(sample.name.clone(), value);
                    }
                    self.variables.merge(controller, &path, samples, now_ms);
                }
                // Each value is stored twice (prefixed and bare).
                let numeric_fields = values.len() / 2;
                if !values.is_empty() {
                    let evicted = self.history.push(HistoryRecord {
                        timestamp_ms: now_ms,
                        values,
                    });
                    if evicted > 0 {
                        debug!(%controller, evicted, "history ring full");
                    }
                }
                Ok(IngestReport::Update {
                    paths,
                    numeric_fields,
                    status,
                })
            }
            InboundMessage::Deployment { path } => Ok(IngestReport::Deployment { path }),
            InboundMessage::Unknown => Ok(IngestReport::Ignored),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SampleValue;

    fn update(path: &str, name: &str, value: serde_json::Value) -> String {
        serde_json::json!({
            "type": "update",
            "variables": { path: [{ "Name": name, "Value": value }] }
        })
        .to_string()
    }

    #[test]
    fn update_merges_namespaced_entry_and_records_history() {
        let mut store = TelemetryStore::new(100);
        let a = ControllerId::from("A");
        let report = store
            .ingest(&a, &update("main-st", "Counter", serde_json::json!(5)), 1_000)
            .unwrap();
        assert_eq!(
            report,
            IngestReport::Update {
                paths: 1,
                numeric_fields: 1,
                status: None
            }
        );
        let entry = store.variables().get("A:main-st").unwrap();
        assert_eq!(entry.samples[0].name, "Counter");
        assert_eq!(entry.samples[0].value, SampleValue::from(5_i64));
        assert_eq!(entry.received_ms, 1_000);

        let record = store.history().latest().unwrap();
        assert_eq!(record.timestamp_ms, 1_000);
        assert_eq!(record.get("A:Counter"), Some(5.0));
        assert_eq!(record.get("Counter"), Some(5.0));
    }

    #[test]
    fn identical_paths_on_two_controllers_do_not_collide() {
        let mut store = TelemetryStore::new(10);
        let a = ControllerId::from("A");
        let b = ControllerId::from("B");
        store
            .ingest(&a, &update("main-st", "Counter", serde_json::json!(1)), 1)
            .unwrap();
        store
            .ingest(&b, &update("main-st", "Counter", serde_json::json!(2)), 2)
            .unwrap();
        assert_eq!(store.variables().len(), 2);
        assert_eq!(
            store.variables().get_for(&a, "main-st").unwrap().samples[0].value,
            SampleValue::from(1_i64)
        );
        assert_eq!(
            store.variables().get_for(&b, "main-st").unwrap().samples[0].value,
            SampleValue::from(2_i64)
        );
    }

    #[test]
    fn non_numeric_values_skip_history_but_update_map() {
        let mut store = TelemetryStore::new(10);
        let a = ControllerId::from("A");
        let report = store
            .ingest(&a, &update("main-st", "State", serde_json::json!("idle")), 7)
            .unwrap();
        assert!(matches!(
            report,
            IngestReport::Update {
                numeric_fields: 0,
                ..
            }
        ));
        assert!(store.variables().get("A:main-st").is_some());
        assert!(store.history().is_empty());
    }

    #[test]
    fn strings_and_booleans_are_coerced() {
        let mut store = TelemetryStore::new(10);
        let a = ControllerId::from("A");
        let text = serde_json::json!({
            "type": "update",
            "variables": {"main-st": [
                {"Name": "Setpoint", "Value": "12.5"},
                {"Name": "Running", "Value": true},
                {"Name": "Mode", "Value": "auto"}
            ]}
        })
        .to_string();
        store.ingest(&a, &text, 3).unwrap();
        let record = store.history().latest().unwrap();
        assert_eq!(record.get("Setpoint"), Some(12.5));
        assert_eq!(record.get("A:Running"), Some(1.0));
        assert_eq!(record.get("Mode"), None);
        assert_eq!(record.values.len(), 4);
    }

    #[test]
    fn history_keeps_most_recent_records_in_order() {
        let mut store = TelemetryStore::new(3);
        let a = ControllerId::from("A");
        for tick in 0..5u64 {
            store
                .ingest(&a, &update("main-st", "Counter", serde_json::json!(tick)), tick)
                .unwrap();
        }
        assert_eq!(store.history().len(), 3);
        assert_eq!(
            store.history().series("Counter"),
            vec![(2, 2.0), (3, 3.0), (4, 4.0)]
        );
        assert_eq!(store.history().pushed(), 5);
        let fresh = store
            .history()
            .since(3)
            .map(|record| record.timestamp_ms)
            .collect::<Vec<_>>();
        assert_eq!(fresh, vec![3, 4]);
        assert_eq!(store.history().since(0).count(), 3);
        assert_eq!(store.history().since(5).count(), 0);
    }

    #[test]
    fn malformed_message_leaves_store_untouched() {
        let mut store = TelemetryStore::new(3);
        let a = ControllerId::from("A");
        let err = store.ingest(&a, "{not json", 1).unwrap_err();
        assert!(matches!(err, LinkError::MalformedMessage { .. }));
        assert!(store.variables().is_empty());
        assert!(store.history().is_empty());
    }

    #[test]
    fn status_and_deployment_are_reported() {
        let mut store = TelemetryStore::new(3);
        let a = ControllerId::from("A");
        let report = store
            .ingest(
                &a,
                r#"{"type":"update","status":{"scanTime":2.0,"status":"running"}}"#,
                1,
            )
            .unwrap();
        let IngestReport::Update { status, paths, .. } = report else {
            panic!("expected update");
        };
        assert_eq!(paths, 0);
        assert_eq!(status.unwrap().scan_time, Some(2.0));
        assert!(store.history().is_empty());

        let report = store
            .ingest(&a, r#"{"type":"deployment","path":"main.st"}"#, 2)
            .unwrap();
        assert_eq!(
            report,
            IngestReport::Deployment {
                path: "main.st".into()
            }
        );
    }

    #[test]
    fn clear_controller_only_drops_its_entries() {
        let mut store = TelemetryStore::new(3);
        let a = ControllerId::from("A");
        let b = ControllerId::from("B");
        store
            .ingest(&a, &update("p", "X", serde_json::json!(1)), 1)
            .unwrap();
        store
            .ingest(&b, &update("p", "X", serde_json::json!(1)), 1)
            .unwrap();
        assert_eq!(store.clear_controller(&a), 1);
        assert!(store.variables().get("A:p").is_none());
        assert!(store.variables().get("B:p").is_some());
    }
}
