//! Parameter-driven component for exercising coupling topologies.
//!
//! Every instance declares one capability named by its `name` parameter,
//! so any dependency graph can be written down in a configuration file:
//!
//! ```toml
//! [DummyComponent.source]
//! name = "raw"
//! finish_delay = 50
//!
//! [DummyComponent.sink]
//! name = "report"
//! capability_reqs = ["raw"]
//! request_delays = [10]
//! ```
//!
//! | Parameter | Meaning |
//! |-----------|---------|
//! | `name` | Capability to declare and publish (required) |
//! | `capability_reqs` | Capabilities acquired in order |
//! | `request_delays` | Milliseconds to wait before each request |
//! | `optional_reqs` | Capabilities acquired if configured |
//! | `finish_delay` | Milliseconds to wait before publishing |
//! | `except` | Fail with this message after publishing |
//! | `output_file` | Write the result here; enables reuse on later runs |

use coupler_component::{
    CapabilityContext, Component, ComponentError, Declarations, DeclarePhase, Params, Payload,
};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Test component configured entirely by parameters.
#[derive(Debug, Default)]
pub struct DummyComponent {
    name: String,
    reqs: Vec<(String, Duration)>,
    optional_reqs: Vec<String>,
    finish_delay: Duration,
    except: Option<String>,
    output_file: Option<PathBuf>,
}

impl DummyComponent {
    /// Kind name used in configuration sections.
    pub const KIND: &'static str = "DummyComponent";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn millis(name: &str, raw: &str) -> Result<Duration, ComponentError> {
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ComponentError::invalid_parameter(name, format!("'{raw}': {e}")))
}

/// Append-only `[elapsed_seconds, message]` log.
struct Events {
    start: Instant,
    entries: Vec<Value>,
}

impl Events {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            entries: Vec::new(),
        }
    }

    fn push(&mut self, message: String) {
        let elapsed = self.start.elapsed().as_secs_f64();
        self.entries.push(json!([elapsed, message]));
    }
}

impl Component for DummyComponent {
    fn declare(
        &self,
        phase: DeclarePhase,
        decl: &mut Declarations<'_>,
    ) -> Result<(), ComponentError> {
        // The capability name is only known once parameters are bound.
        if phase == DeclarePhase::Bound {
            decl.declare(&self.name)?;
        }
        Ok(())
    }

    fn bind(&mut self, params: &Params) -> Result<(), ComponentError> {
        self.name = params.require("name")?.to_string();

        let reqs = params.get_list("capability_reqs");
        let delays = if params.contains("request_delays") {
            params
                .get_list("request_delays")
                .iter()
                .map(|raw| millis("request_delays", raw))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            vec![Duration::ZERO; reqs.len()]
        };
        if delays.len() != reqs.len() {
            return Err(ComponentError::invalid_parameter(
                "request_delays",
                format!(
                    "{} delays for {} capability_reqs",
                    delays.len(),
                    reqs.len()
                ),
            ));
        }
        self.reqs = reqs.into_iter().zip(delays).collect();

        self.optional_reqs = params.get_list("optional_reqs");
        self.finish_delay = params
            .get("finish_delay")
            .map(|raw| millis("finish_delay", raw))
            .transpose()?
            .unwrap_or_default();
        self.except = params.get("except").map(str::to_string);
        self.output_file = params.get("output_file").map(PathBuf::from);
        Ok(())
    }

    fn run(&mut self, ctx: &dyn CapabilityContext) -> Result<(), ComponentError> {
        info!(component = %ctx.component(), "Start {}", self.name);
        let mut events = Events::new();
        let mut received = Map::new();
        events.push(format!("Start {}", self.name));

        for (req, delay) in &self.reqs {
            thread::sleep(*delay);
            events.push(format!("Requesting data from {req}"));
            let payload = ctx.acquire(req)?;
            events.push(format!("Received data from {req}"));
            received.insert(req.clone(), payload.value().clone());
        }

        for req in &self.optional_reqs {
            match ctx.acquire_optional(req)? {
                Some(payload) => {
                    events.push(format!("Received optional data from {req}"));
                    received.insert(req.clone(), payload.value().clone());
                }
                None => {
                    debug!(capability = %req, "Optional input not configured");
                    events.push(format!("No provider for {req}"));
                }
            }
        }

        thread::sleep(self.finish_delay);

        let result = json!({
            "name": self.name,
            "events": events.entries,
            "received": received,
        });

        if let Some(path) = &self.output_file {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ComponentError::artifact(parent, &e))?;
            }
            let text = serde_json::to_vec_pretty(&result)
                .map_err(|e| ComponentError::ExecutionFailed(e.to_string()))?;
            std::fs::write(path, text).map_err(|e| ComponentError::artifact(path, &e))?;
        }

        ctx.publish(&self.name, Payload::new(result))?;

        match &self.except {
            Some(message) => Err(ComponentError::ExecutionFailed(message.clone())),
            None => Ok(()),
        }
    }

    fn inputs(&self) -> Vec<String> {
        self.reqs
            .iter()
            .map(|(name, _)| name.clone())
            .chain(self.optional_reqs.iter().cloned())
            .collect()
    }

    fn expected_artifacts(&self) -> Vec<PathBuf> {
        self.output_file.iter().cloned().collect()
    }

    /// Replays the result written by an earlier run.
    fn cached_output(&self, capability: &str) -> Payload {
        self.output_file
            .as_ref()
            .and_then(|path| std::fs::read(path).ok())
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
            .map_or_else(
                || Payload::new(json!({ "capability": capability, "cached": true })),
                Payload::new,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coupler_component::testing::{MockContext, RecordingSink};
    use coupler_types::ComponentId;

    fn params(pairs: &[(&str, &str)]) -> Params {
        let mut params = Params::new();
        for (k, v) in pairs {
            params.insert(*k, *v);
        }
        params
    }

    fn bound(pairs: &[(&str, &str)]) -> DummyComponent {
        let mut c = DummyComponent::new();
        c.bind(&params(pairs)).expect("valid params");
        c
    }

    fn ctx(name: &str) -> MockContext {
        MockContext::new(ComponentId::from_section("DummyComponent.t")).owning([name])
    }

    #[test]
    fn declares_name_after_binding() {
        let c = bound(&[("name", "raw")]);
        let sink = RecordingSink::new();
        let owner = ComponentId::from_section("DummyComponent.t");
        let mut declared = Vec::new();

        let mut decl = Declarations::new(&sink, &owner, &mut declared);
        c.declare(DeclarePhase::Construct, &mut decl).expect("construct");
        c.declare(DeclarePhase::Bound, &mut decl).expect("bound");
        assert_eq!(declared, vec!["raw".to_string()]);
    }

    #[test]
    fn name_required() {
        let err = DummyComponent::new()
            .bind(&Params::new())
            .expect_err("no name");
        assert!(matches!(err, ComponentError::MissingParameter { .. }));
    }

    #[test]
    fn delay_count_must_match() {
        let err = DummyComponent::new()
            .bind(&params(&[
                ("name", "x"),
                ("capability_reqs", "a, b"),
                ("request_delays", "10"),
            ]))
            .expect_err("mismatch");
        assert!(err.to_string().contains("request_delays"));
    }

    #[test]
    fn delays_default_to_zero() {
        let c = bound(&[("name", "x"), ("capability_reqs", "a, b")]);
        assert_eq!(c.inputs(), vec!["a", "b"]);
        assert!(c.reqs.iter().all(|(_, d)| d.is_zero()));
    }

    #[test]
    fn run_records_events_and_inputs() {
        let mut c = bound(&[("name", "out"), ("capability_reqs", "raw")]);
        let ctx = ctx("out");
        ctx.provide("raw", json!([1, 2, 3]), true);

        c.run(&ctx).expect("runs");

        let result = ctx.published_value("out").expect("published");
        assert_eq!(result["name"], "out");
        assert_eq!(result["received"]["raw"], json!([1, 2, 3]));
        let messages: Vec<&str> = result["events"]
            .as_array()
            .expect("events")
            .iter()
            .filter_map(|e| e[1].as_str())
            .collect();
        assert_eq!(
            messages,
            vec!["Start out", "Requesting data from raw", "Received data from raw"]
        );
    }

    #[test]
    fn optional_input_may_be_missing() {
        let mut c = bound(&[("name", "out"), ("optional_reqs", "maybe")]);
        let ctx = ctx("out");
        c.run(&ctx).expect("runs without provider");
        assert_eq!(ctx.acquired(), vec!["maybe"]);
    }

    #[test]
    fn failed_input_propagates() {
        let mut c = bound(&[("name", "out"), ("capability_reqs", "raw")]);
        let ctx = ctx("out");
        ctx.fail("raw", "Source", "disk full");
        let err = c.run(&ctx).expect_err("input failed");
        assert!(matches!(err, ComponentError::Capability(_)));
        assert!(ctx.published("out").is_none());
    }

    #[test]
    fn except_fails_after_publishing() {
        let mut c = bound(&[("name", "out"), ("except", "requested failure")]);
        let ctx = ctx("out");
        let err = c.run(&ctx).expect_err("configured to fail");
        assert_eq!(err.to_string(), "execution failed: requested failure");
        assert!(ctx.published("out").is_some());
    }

    #[test]
    fn output_file_written_and_replayed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("out.json");
        let path_str = path.to_string_lossy().to_string();
        let mut c = bound(&[("name", "out"), ("output_file", path_str.as_str())]);

        assert_eq!(c.expected_artifacts(), vec![path.clone()]);
        let ctx = ctx("out");
        c.run(&ctx).expect("runs");
        assert!(path.exists());

        let cached = c.cached_output("out");
        assert_eq!(cached.value()["name"], "out");
    }

    #[test]
    fn cached_output_without_file() {
        let c = bound(&[("name", "out")]);
        assert_eq!(c.cached_output("out").value()["cached"], true);
    }
}
