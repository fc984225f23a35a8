//! Integration tests for local runs.
//!
//! Tests complete runs through the dispatcher:
//! - data-driven ordering across a Source → Transform → Sink chain
//! - failure propagation to downstream components
//! - reuse of cached output and recomputation after upstream changes
//! - deadlock detection

use coupler_component::{
    CapabilityContext, Component, ComponentError, Declarations, DeclarePhase, Params, Payload,
};
use coupler_runtime::config::{ConfigLoader, RunConfig};
use coupler_runtime::lifecycle::ComponentState;
use coupler_runtime::{ComponentFactory, DispatchError, Dispatcher, RunReport};
use coupler_types::ComponentId;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// Test Fixtures
// =============================================================================

/// Publishes `values` under `series`.
struct Source;

impl Component for Source {
    fn declare(&self, phase: DeclarePhase, decl: &mut Declarations<'_>) -> Result<(), ComponentError> {
        if phase == DeclarePhase::Construct {
            decl.declare("series")?;
        }
        Ok(())
    }

    fn bind(&mut self, _params: &Params) -> Result<(), ComponentError> {
        Ok(())
    }

    fn run(&mut self, ctx: &dyn CapabilityContext) -> Result<(), ComponentError> {
        std::thread::sleep(Duration::from_millis(30));
        ctx.publish("series", Payload::new(json!([1.0, 2.0, 3.0])))?;
        Ok(())
    }
}

/// Scales `series` into `scaled`, or fails when `fail` is set.
struct Transform {
    factor: f64,
    fail: bool,
}

impl Component for Transform {
    fn declare(&self, phase: DeclarePhase, decl: &mut Declarations<'_>) -> Result<(), ComponentError> {
        if phase == DeclarePhase::Construct {
            decl.declare("scaled")?;
        }
        Ok(())
    }

    fn bind(&mut self, params: &Params) -> Result<(), ComponentError> {
        self.factor = params
            .get("factor")
            .map(|raw| {
                raw.parse::<f64>()
                    .map_err(|e| ComponentError::invalid_parameter("factor", e.to_string()))
            })
            .transpose()?
            .unwrap_or(1.0);
        self.fail = params.get_bool("fail")?.unwrap_or(false);
        Ok(())
    }

    fn run(&mut self, ctx: &dyn CapabilityContext) -> Result<(), ComponentError> {
        let series = ctx.acquire("series")?;
        if self.fail {
            return Err(ComponentError::ExecutionFailed("solver diverged".into()));
        }
        let scaled: Vec<f64> = series
            .value()
            .as_array()
            .map(|xs| xs.iter().filter_map(Value::as_f64).map(|x| x * self.factor).collect())
            .unwrap_or_default();
        ctx.publish("scaled", Payload::new(json!(scaled)))?;
        Ok(())
    }

    fn inputs(&self) -> Vec<String> {
        vec!["series".into()]
    }
}

/// Sums `scaled` into `total` and records it.
struct Sink {
    seen: Arc<Mutex<Option<Value>>>,
}

impl Component for Sink {
    fn declare(&self, phase: DeclarePhase, decl: &mut Declarations<'_>) -> Result<(), ComponentError> {
        if phase == DeclarePhase::Construct {
            decl.declare("total")?;
        }
        Ok(())
    }

    fn bind(&mut self, _params: &Params) -> Result<(), ComponentError> {
        Ok(())
    }

    fn run(&mut self, ctx: &dyn CapabilityContext) -> Result<(), ComponentError> {
        let scaled = ctx.acquire("scaled")?;
        let total: f64 = scaled
            .value()
            .as_array()
            .map(|xs| xs.iter().filter_map(Value::as_f64).sum())
            .unwrap_or_default();
        *self.seen.lock() = Some(json!(total));
        ctx.publish("total", Payload::new(json!(total)))?;
        Ok(())
    }
}

fn chain_factory(seen: &Arc<Mutex<Option<Value>>>) -> ComponentFactory {
    let mut factory = ComponentFactory::with_builtins();
    factory.register("Source", |_| Box::new(Source));
    factory.register("Transform", |_| {
        Box::new(Transform {
            factor: 1.0,
            fail: false,
        })
    });
    let seen = Arc::clone(seen);
    factory.register("Sink", move |_| {
        Box::new(Sink {
            seen: Arc::clone(&seen),
        })
    });
    factory
}

fn config(text: &str) -> RunConfig {
    ConfigLoader::from_toml(text)
        .skip_env_vars()
        .load()
        .expect("valid config")
}

fn run(text: &str) -> RunReport {
    Dispatcher::new(config(text)).run().expect("run starts")
}

fn state(report: &RunReport, section: &str) -> ComponentState {
    report
        .result(&ComponentId::from_section(section))
        .map(|r| r.state)
        .expect("component reported")
}

// =============================================================================
// Chain
// =============================================================================

mod chain {
    use super::*;

    #[test]
    fn order_follows_data_not_configuration() {
        let seen = Arc::new(Mutex::new(None));
        // Listed downstream first on purpose.
        let report = Dispatcher::new(config(
            "[Sink]\n[Transform]\nfactor = \"2\"\n[Source]\n",
        ))
        .with_factory(chain_factory(&seen))
        .run()
        .expect("runs");

        assert!(report.is_success(), "{:?}", report.summary_lines());
        assert_eq!(*seen.lock(), Some(json!(12.0)));
        assert_eq!(report.results.len(), 3);
    }

    #[test]
    fn failure_reaches_sink_with_root_cause() {
        let seen = Arc::new(Mutex::new(None));
        let report = Dispatcher::new(config("[Source]\n[Transform]\nfail = true\n[Sink]\n"))
            .with_factory(chain_factory(&seen))
            .run()
            .expect("runs");

        assert_eq!(state(&report, "Source"), ComponentState::Succeeded);
        assert_eq!(state(&report, "Transform"), ComponentState::Failed);
        assert_eq!(state(&report, "Sink"), ComponentState::Failed);
        assert!(seen.lock().is_none());

        let lines = report.summary_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.contains("Transform: execution failed: solver diverged")));

        match report.into_result() {
            Err(DispatchError::ComponentsFailed { failed, total, .. }) => {
                assert_eq!((failed, total), (2, 3));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn dummy_fan_in() {
        let report = run(r#"
[DummyComponent.a]
name = "a"
finish_delay = 20

[DummyComponent.b]
name = "b"
request_delays = []

[DummyComponent.c]
name = "c"
capability_reqs = ["a", "b"]
request_delays = [0, 10]
optional_reqs = ["not-configured"]
"#);
        assert!(report.is_success(), "{:?}", report.summary_lines());
    }

    #[test]
    fn missing_required_input_fails_fast() {
        let start = Instant::now();
        let report = run("[DummyComponent.a]\nname = \"a\"\ncapability_reqs = \"ghost\"\n");
        assert_eq!(state(&report, "DummyComponent.a"), ComponentState::Failed);
        assert!(report.summary_lines()[0].contains("capability not found: ghost"));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}

// =============================================================================
// Cached Output
// =============================================================================

mod cached_output {
    use super::*;

    fn pipeline(dir: &Path, clobber: bool) -> String {
        format!(
            r#"
[Global]
clobber = {clobber}

[DummyComponent.a]
name = "a"
output_file = "{a}"

[DummyComponent.b]
name = "b"
capability_reqs = "a"
output_file = "{b}"
"#,
            a = dir.join("a.json").display(),
            b = dir.join("b.json").display(),
        )
    }

    fn skipped(report: &RunReport) -> Vec<String> {
        let mut names: Vec<String> = report.skipped().map(ToString::to_string).collect();
        names.sort();
        names
    }

    #[test]
    fn existing_outputs_reused_when_not_clobbering() {
        let dir = tempfile::tempdir().expect("tempdir");

        let first = run(&pipeline(dir.path(), true));
        assert!(first.is_success(), "{:?}", first.summary_lines());
        assert!(skipped(&first).is_empty());
        assert!(dir.path().join("b.json").exists());

        let second = run(&pipeline(dir.path(), false));
        assert!(second.is_success(), "{:?}", second.summary_lines());
        assert_eq!(skipped(&second), vec!["DummyComponent.a", "DummyComponent.b"]);
    }

    #[test]
    fn recomputed_input_forces_downstream_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(run(&pipeline(dir.path(), true)).is_success());

        std::fs::remove_file(dir.path().join("a.json")).expect("remove upstream output");
        let report = run(&pipeline(dir.path(), false));
        assert!(report.is_success(), "{:?}", report.summary_lines());
        assert!(skipped(&report).is_empty());
    }

    #[test]
    fn clobber_always_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(run(&pipeline(dir.path(), true)).is_success());
        let report = run(&pipeline(dir.path(), true));
        assert!(skipped(&report).is_empty());
    }

    #[test]
    fn component_clobber_overrides_global() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(run(&pipeline(dir.path(), true)).is_success());

        let text = pipeline(dir.path(), false).replace(
            "name = \"a\"\n",
            "name = \"a\"\nclobber = true\n",
        );
        let report = run(&text);
        assert!(report.is_success(), "{:?}", report.summary_lines());
        // a reran, so b sees a fresh input.
        assert!(skipped(&report).is_empty());
    }
}

// =============================================================================
// Deadlock
// =============================================================================

mod deadlock {
    use super::*;

    const CYCLE: &str = r#"
[Global]
deadlock_timeout_ms = 200
poll_interval_ms = 10

[DummyComponent.a]
name = "a"
capability_reqs = "b"

[DummyComponent.b]
name = "b"
capability_reqs = "a"

[DummyComponent.bystander]
name = "c"
"#;

    #[test]
    fn cycle_reported_and_unrelated_work_completes() {
        let start = Instant::now();
        let report = run(CYCLE);

        assert_eq!(state(&report, "DummyComponent.bystander"), ComponentState::Succeeded);
        assert_eq!(state(&report, "DummyComponent.a"), ComponentState::Failed);
        assert_eq!(state(&report, "DummyComponent.b"), ComponentState::Failed);

        let mut edges: Vec<String> = report.deadlock.iter().map(ToString::to_string).collect();
        edges.sort();
        assert_eq!(
            edges,
            vec![
                "DummyComponent.a waits for 'b'",
                "DummyComponent.b waits for 'a'"
            ]
        );
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn deadlock_is_the_run_error() {
        let err = run(CYCLE).into_result().expect_err("deadlocked");
        assert!(matches!(err, DispatchError::Deadlock { .. }));
        assert!(err.to_string().contains("deadlock"));
    }

    #[test]
    fn slow_producer_is_not_a_deadlock() {
        let report = run(
            r#"
[Global]
deadlock_timeout_ms = 100
poll_interval_ms = 10

[DummyComponent.slow]
name = "slow"
finish_delay = 400

[DummyComponent.waiter]
name = "w"
capability_reqs = "slow"
"#,
        );
        assert!(report.is_success(), "{:?}", report.summary_lines());
        assert!(report.deadlock.is_empty());
    }
}
