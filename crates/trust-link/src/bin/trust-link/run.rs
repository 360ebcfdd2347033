//! Command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use smol_str::SmolStr;
use tracing::{debug, info};
use trust_link::program::{self, CompileOutput};
use trust_link::{
    ControllerHub, LinkConfig, Notification, Notifier, SharedHub, StdClock, SubscribeOutcome,
    WsConnector,
};

use crate::style::{self, Tone};

/// Prints notifications to stderr, coloured by level.
#[derive(Debug, Default)]
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        eprintln!(
            "{} {}",
            style::paint(notification.level.into(), format!("[{}]", notification.title)),
            notification.message
        );
    }
}

pub struct WatchArgs {
    pub controller: Option<String>,
    pub program: Option<PathBuf>,
    pub vars: Vec<String>,
    pub namespace: Option<String>,
    pub seconds: u64,
}

pub fn load_config(
    path: &Path,
    timeout_ms: Option<u64>,
    history: Option<usize>,
) -> anyhow::Result<LinkConfig> {
    let config = LinkConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let config = config.with_overrides(timeout_ms, history)?;
    if config.controllers.is_empty() {
        bail!("{} does not declare any [[controllers]]", path.display());
    }
    Ok(config)
}

fn build_hub(config: &LinkConfig) -> ControllerHub {
    let connector = WsConnector::new(config.default_port, config.connect_timeout)
        .with_poll_interval(config.poll_interval);
    let mut hub = ControllerHub::new(
        connector,
        Arc::new(ConsoleNotifier),
        Arc::new(StdClock::new()),
        config.hub_settings(),
    );
    for controller in &config.controllers {
        hub.add_controller(
            controller.id.clone(),
            controller.name.clone(),
            controller.address.clone(),
        );
    }
    hub
}

/// Pump `hub` until `done` holds or `limit` elapses.
fn pump_until(
    hub: &mut ControllerHub,
    poll: Duration,
    limit: Duration,
    done: impl Fn(&ControllerHub) -> bool,
) {
    let started = Instant::now();
    while !done(&*hub) && started.elapsed() < limit {
        hub.pump(poll);
    }
}

pub fn run_status(config: &LinkConfig, settle_ms: u64) -> anyhow::Result<()> {
    let mut hub = build_hub(config);
    hub.connect_all();
    let limit = config.connect_timeout + config.poll_interval * 4;
    pump_until(&mut hub, config.poll_interval, limit, |hub| {
        hub.connecting_controllers().is_empty()
    });
    if hub.is_connected() && settle_ms > 0 {
        pump_until(
            &mut hub,
            config.poll_interval,
            Duration::from_millis(settle_ms),
            |hub| {
                hub.controllers()
                    .filter(|controller| controller.is_connected())
                    .all(|controller| controller.runtime_status().is_some())
            },
        );
    }
    print!("{}", hub.status_view().render_table());
    hub.disconnect_all();
    Ok(())
}

pub fn run_watch(config: &LinkConfig, args: WatchArgs) -> anyhow::Result<()> {
    let compiled = match args.program.as_deref() {
        Some(path) => Some(compile(path, args.namespace.as_deref())?),
        None => None,
    };
    if compiled.is_none() && args.vars.is_empty() {
        bail!("nothing to watch: pass --program and/or --var");
    }

    let mut hub = build_hub(config);
    if let Some(id) = args.controller.as_deref() {
        if !hub.registry().contains(id) {
            bail!("controller '{id}' is not declared in the configuration");
        }
    }
    hub.connect_target(args.controller.as_deref());
    let limit = config.connect_timeout + config.poll_interval * 4;
    pump_until(&mut hub, config.poll_interval, limit, |hub| {
        hub.connecting_controllers().is_empty()
    });
    if !hub.is_connected() {
        bail!("no controller could be connected");
    }

    let outcome = match (&compiled, args.vars.is_empty()) {
        (Some(output), true) => hub.subscribe_program(output),
        _ => {
            let mut names = compiled
                .as_ref()
                .and_then(|output| output.ast.as_ref())
                .map(|ast| ast.watch_list())
                .unwrap_or_default();
            names.extend(args.vars.iter().map(SmolStr::new));
            let namespace = args
                .namespace
                .as_deref()
                .or_else(|| {
                    compiled
                        .as_ref()
                        .and_then(|output| output.ast.as_ref())
                        .map(|ast| ast.namespace())
                })
                .unwrap_or("main");
            let namespace = SmolStr::new(namespace);
            hub.subscribe_to_variables(names, namespace)
        }
    };
    match outcome {
        SubscribeOutcome::Sent {
            connections,
            failed,
        } => info!(connections, failed, "subscription sent"),
        SubscribeOutcome::NoActiveConnection | SubscribeOutcome::Skipped => {
            bail!("subscription was not sent");
        }
    }

    let shared = SharedHub::new(hub);
    let pump = shared.spawn_pump(config.poll_interval)?;
    let started = Instant::now();
    let limit = (args.seconds > 0).then(|| Duration::from_secs(args.seconds));
    let mut seen = 0;
    loop {
        thread::sleep(config.poll_interval);
        let (pushed, records) = shared.history_since(seen);
        seen = pushed;
        for record in records {
            let fields = record
                .values
                .iter()
                .filter(|(key, _)| key.contains(':'))
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{} {fields}", style::paint(Tone::Accent, record.timestamp_ms.to_string()));
        }
        if !shared.lock().is_connected() {
            debug!("all controllers disconnected");
            break;
        }
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
    }
    pump.stop();
    shared.disconnect_all();
    Ok(())
}

fn compile(path: &Path, namespace: Option<&str>) -> anyhow::Result<CompileOutput> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let namespace = namespace.map_or_else(|| program::namespace_for_path(path), SmolStr::new);
    let output = program::validate(&namespace, &source);
    print_diagnostics(path, &output);
    if !output.success {
        bail!("{} has errors", path.display());
    }
    Ok(output)
}

fn print_diagnostics(path: &Path, output: &CompileOutput) {
    for diagnostic in &output.diagnostics {
        let tone = match diagnostic.severity {
            program::Severity::Error => Tone::Error,
            program::Severity::Warning => Tone::Warning,
        };
        eprintln!(
            "{}",
            style::paint(tone, format!("{}: {diagnostic}", path.display()))
        );
    }
}

pub fn run_check(path: &Path) -> anyhow::Result<()> {
    let output = compile(path, None)?;
    let Some(ast) = output.ast.as_ref() else {
        bail!("{} produced no declarations", path.display());
    };
    println!(
        "{} {} ({} variables)",
        style::paint(Tone::Success, "ok"),
        ast.namespace(),
        ast.watch_list().len()
    );
    for name in ast.watch_list() {
        println!("  {name}");
    }
    Ok(())
}
