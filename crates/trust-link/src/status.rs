//! Aggregate status view.
//!
//! A read-only projection of the registry. Nothing here is stored: every
//! field is recomputed from controller states when the view is built.

#![allow(missing_docs)]

use std::fmt::Write as _;

use serde::Serialize;
use smol_str::SmolStr;

use crate::protocol::RuntimeStatus;
use crate::registry::{ConnectionState, ControllerId, ControllerRegistry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerView {
    pub id: ControllerId,
    pub name: SmolStr,
    pub address: SmolStr,
    pub state: ConnectionState,
    pub runtime_status: Option<RuntimeStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub controllers: Vec<ControllerView>,
    pub is_connected: bool,
    pub connecting: Vec<ControllerId>,
}

impl StatusView {
    #[must_use]
    pub fn from_registry(registry: &ControllerRegistry) -> Self {
        let controllers = registry
            .iter()
            .map(|controller| ControllerView {
                id: controller.id().clone(),
                name: SmolStr::new(controller.name()),
                address: SmolStr::new(controller.address()),
                state: controller.state(),
                runtime_status: controller.runtime_status().cloned(),
            })
            .collect::<Vec<_>>();
        let is_connected = controllers
            .iter()
            .any(|view| view.state == ConnectionState::Connected);
        let connecting = controllers
            .iter()
            .filter(|view| view.state == ConnectionState::Connecting)
            .map(|view| view.id.clone())
            .collect();
        Self {
            controllers,
            is_connected,
            connecting,
        }
    }

    #[must_use]
    pub fn controller(&self, id: &str) -> Option<&ControllerView> {
        self.controllers.iter().find(|view| view.id.as_str() == id)
    }

    #[must_use]
    pub fn is_connecting(&self, id: &str) -> bool {
        self.connecting.iter().any(|entry| entry.as_str() == id)
    }

    /// Fixed-width text table, one row per controller.
    #[must_use]
    pub fn render_table(&self) -> String {
        let id_width = column_width("ID", self.controllers.iter().map(|v| v.id.as_str()));
        let name_width = column_width("NAME", self.controllers.iter().map(|v| v.name.as_str()));
        let address_width = column_width(
            "ADDRESS",
            self.controllers.iter().map(|v| v.address.as_str()),
        );
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<id_width$}  {:<name_width$}  {:<address_width$}  {:<12}  STATUS",
            "ID", "NAME", "ADDRESS", "STATE"
        );
        for view in &self.controllers {
            let runtime = view
                .runtime_status
                .as_ref()
                .map(describe_runtime)
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{:<id_width$}  {:<name_width$}  {:<address_width$}  {:<12}  {runtime}",
                view.id.as_str(),
                view.name,
                view.address,
                view.state.as_str(),
            );
        }
        out
    }
}

fn column_width<'a>(header: &str, values: impl Iterator<Item = &'a str>) -> usize {
    values.map(str::len).chain([header.len()]).max().unwrap_or(0)
}

fn describe_runtime(status: &RuntimeStatus) -> String {
    let mut parts = Vec::new();
    if let Some(state) = status.status.as_ref() {
        parts.push(state.to_string());
    }
    if let Some(scan) = status.scan_time {
        parts.push(format!("scan {scan:.2}ms"));
    }
    if let Some(tasks) = status.task_count {
        parts.push(format!("{tasks} tasks"));
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(", ")
    }
}
