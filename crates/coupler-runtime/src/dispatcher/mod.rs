//! Dispatcher: instantiate, launch, watch, report.
//!
//! # Flow
//!
//! ```text
//!  RunConfig ──► factory.create ──► Created ──bind──► ParamsBound ─┐
//!                                                                  │ seal registry
//!                      ┌───────────────────────────────────────────┘
//!                      ▼
//!              launch all runners ──► wait for terminal states ──► RunReport
//!                                          │
//!                                     Watchdog (poll)
//!                                          │ stall
//!                                          ▼
//!                            fail pending capabilities of live runners
//! ```
//!
//! In distributed mode each poll also reports to the coordinator whether
//! every live runner is blocked; a deadlock the coordinator declares is
//! handled like a local one.
//!
//! The dispatcher imposes no ordering: every runner starts at once, and
//! execution order emerges from blocking `acquire` calls. Construction
//! happens for every component before any parameters are bound, so the
//! two declaration phases are global.
//!
//! In distributed mode each process runs the same flow for the components
//! assigned to it, exchanging its declared names with the coordinator
//! between declaration and launch, and joining the completion barrier at
//! the end.

mod report;
mod watchdog;

pub use report::RunReport;
pub use watchdog::{blocked_runners, BlockedOn, Watchdog};

use crate::config::{ComponentSection, ConfigError, RunConfig};
use crate::error::DispatchError;
use crate::factory::ComponentFactory;
use crate::lifecycle::{Created, ParamsBound, RunnerHandle, RunnerTable};
use crate::registry::CapabilityRegistry;
use crate::transport::{Session, Transport, TransportError};
use coupler_component::{FailureCause, Payload, GENERAL_CAPABILITY};
use coupler_types::ComponentId;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runs one configuration to completion.
///
/// # Example
///
/// ```
/// use coupler_runtime::config::ConfigLoader;
/// use coupler_runtime::Dispatcher;
///
/// let config = ConfigLoader::from_toml(
///     r#"
/// [DummyComponent.source]
/// name = "raw"
///
/// [DummyComponent.sink]
/// name = "report"
/// capability_reqs = "raw"
/// "#,
/// )
/// .skip_env_vars()
/// .load()
/// .unwrap();
///
/// let report = Dispatcher::new(config).run().unwrap();
/// assert!(report.is_success());
/// ```
pub struct Dispatcher {
    config: RunConfig,
    factory: ComponentFactory,
}

impl Dispatcher {
    /// A dispatcher using the builtin component kinds.
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            factory: ComponentFactory::with_builtins(),
        }
    }

    /// Replaces the component factory.
    #[must_use]
    pub fn with_factory(mut self, factory: ComponentFactory) -> Self {
        self.factory = factory;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs every component in this process, one thread each.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Config`] if any component cannot be built, bound or
    /// declared. Component failures and deadlocks are reported in the
    /// returned [`RunReport`], not as errors.
    pub fn run(&self) -> Result<RunReport, DispatchError> {
        let registry = Arc::new(CapabilityRegistry::new());
        let sections: Vec<&ComponentSection> = self.config.components.iter().collect();
        info!(components = sections.len(), "Starting local run");

        let bound = self.instantiate(&registry, &sections)?;
        registry.seal();
        Ok(self.execute(&registry, bound, None))
    }

    /// Runs the components assigned to `transport`'s rank, cooperating with
    /// the other processes of the run.
    ///
    /// Every process returns the same global report.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Config`] if any process rejected the configuration,
    ///   including duplicate declarations across processes
    /// - [`DispatchError::Transport`] if the processes cannot be coordinated
    pub fn run_distributed(&self, transport: Transport) -> Result<RunReport, DispatchError> {
        let rank = transport.rank();
        let registry = Arc::new(CapabilityRegistry::new());
        let mut session = transport.start(&self.config.global, Arc::clone(&registry))?;

        let prepared = self
            .config
            .components_on(rank)
            .and_then(|sections| self.instantiate(&registry, &sections));
        info!(rank = %rank, ok = prepared.is_ok(), "Local declaration finished");

        let exported = match &prepared {
            Ok(_) => Ok(registry
                .local_capabilities()
                .into_iter()
                .filter(|(name, _)| name != GENERAL_CAPABILITY)
                .collect()),
            Err(e) => Err(e.to_string()),
        };

        let owners = match session.exchange_directory(exported) {
            Ok(owners) => owners,
            Err(TransportError::Rejected { reason }) => {
                let err = prepared.err().unwrap_or(ConfigError::Remote { reason });
                return Err(err.into());
            }
            Err(e) => return Err(e.into()),
        };
        let bound = prepared?;

        registry.install_directory(
            owners
                .into_iter()
                .filter(|o| o.rank != rank)
                .map(|o| (o.name, o.rank, o.component)),
        );
        registry.seal();

        let local = self.execute(&registry, bound, Some(&mut session));
        Ok(session.finish(local)?)
    }

    /// Publishes the global section, then constructs and binds every
    /// component.
    fn instantiate(
        &self,
        registry: &Arc<CapabilityRegistry>,
        sections: &[&ComponentSection],
    ) -> Result<Vec<ParamsBound>, ConfigError> {
        let global = ComponentId::global();
        registry
            .register(GENERAL_CAPABILITY, &global)
            .and_then(|()| {
                registry.publish(
                    GENERAL_CAPABILITY,
                    Payload::new(self.config.global.to_json()),
                    false,
                )
            })
            .map_err(|e| ConfigError::component(&global, e))?;

        let created = sections
            .iter()
            .map(|section| {
                let component = self.factory.create(&section.id)?;
                Created::new(section.id.clone(), component, Arc::clone(registry))
            })
            .collect::<Result<Vec<_>, _>>()?;

        created
            .into_iter()
            .zip(sections)
            .map(|(created, section)| created.bind(section.params.clone()))
            .collect()
    }

    /// Launches every runner and waits for all of them, watching for
    /// deadlock locally and, with a `session`, across processes.
    fn execute(
        &self,
        registry: &Arc<CapabilityRegistry>,
        bound: Vec<ParamsBound>,
        mut session: Option<&mut Session>,
    ) -> RunReport {
        let global = &self.config.global;
        let table = Arc::new(RunnerTable::new());

        let handles: Vec<RunnerHandle> = bound
            .into_iter()
            .map(|b| b.launch(global.clobber, Arc::clone(&table)))
            .collect();
        info!(runners = handles.len(), "All runners launched");

        let mut watchdog = Watchdog::new(global.deadlock_timeout);
        let mut deadlock = Vec::new();
        while !table.all_terminal() {
            table.wait(global.poll_interval);
            if !deadlock.is_empty() {
                continue;
            }
            let mut detected = watchdog.observe(&table, registry);
            if let Some(session) = session.as_mut() {
                let blocked = blocked_runners(&table);
                session.report_progress(blocked.as_ref().map(|_| registry.epoch()));
                if session.deadlock_declared() && detected.is_none() {
                    if blocked.is_none() {
                        warn!("Deadlock declared by the coordinator, but local runners are progressing");
                    }
                    detected = blocked;
                }
            }
            if let Some(blocked) = detected {
                let description = blocked
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                error!(blocked = %description, "Deadlock detected");

                let live: Vec<ComponentId> =
                    blocked.iter().map(|b| b.component.clone()).collect();
                let cause = FailureCause::new("deadlock", description);
                let failed = registry.fail_pending_of(&live, &cause);
                if failed.is_empty() {
                    warn!("Deadlocked runners own no pending capabilities");
                }
                deadlock = blocked;
            }
        }

        let results = handles.into_iter().map(RunnerHandle::join).collect();
        let report = RunReport { results, deadlock };
        info!(
            succeeded = report.results.iter().filter(|r| r.is_success()).count(),
            failed = report.failures().count(),
            "Run finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use crate::lifecycle::ComponentState;
    use coupler_component::{
        CapabilityContext, Component, ComponentError, Declarations, DeclarePhase, Params,
    };
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn config(text: &str) -> RunConfig {
        ConfigLoader::from_toml(text)
            .skip_env_vars()
            .load()
            .expect("valid config")
    }

    #[test]
    fn unknown_kind_is_config_error() {
        let err = Dispatcher::new(config("[Nope.x]\nname = \"x\"\n"))
            .run()
            .expect_err("unknown kind");
        assert!(err.is_config());
    }

    #[test]
    fn duplicate_capability_is_config_error() {
        let err = Dispatcher::new(config(
            "[DummyComponent.a]\nname = \"x\"\n[DummyComponent.b]\nname = \"x\"\n",
        ))
        .run()
        .expect_err("duplicate");
        assert!(err.to_string().contains("duplicate definition"));
    }

    #[test]
    fn general_is_reserved() {
        let err = Dispatcher::new(config("[DummyComponent.a]\nname = \"general\"\n"))
            .run()
            .expect_err("reserved name");
        assert!(err.is_config());
    }

    struct ReadsGlobal;

    impl Component for ReadsGlobal {
        fn declare(
            &self,
            phase: DeclarePhase,
            decl: &mut Declarations<'_>,
        ) -> Result<(), ComponentError> {
            if phase == DeclarePhase::Construct {
                decl.declare("echo")?;
            }
            Ok(())
        }

        fn bind(&mut self, _params: &Params) -> Result<(), ComponentError> {
            Ok(())
        }

        fn run(&mut self, ctx: &dyn CapabilityContext) -> Result<(), ComponentError> {
            let global = ctx.global()?;
            ctx.publish("echo", Payload::new(global.value()["inputdir"].clone()))?;
            Ok(())
        }
    }

    #[test]
    fn components_see_global_section() {
        let mut factory = ComponentFactory::with_builtins();
        factory.register("ReadsGlobal", |_| Box::new(ReadsGlobal));
        let report = Dispatcher::new(config(
            "[Global]\ninputdir = \"/data\"\n[ReadsGlobal]\n[DummyComponent.c]\nname = \"c\"\ncapability_reqs = \"echo\"\n",
        ))
        .with_factory(factory)
        .run()
        .expect("runs");
        assert!(report.is_success(), "{:?}", report.summary_lines());
    }

    #[test]
    fn failed_component_reported_with_root_cause() {
        let report = Dispatcher::new(config(
            r#"
[DummyComponent.src]
name = "raw"
capability_reqs = "forcing"

[DummyComponent.dst]
name = "out"
capability_reqs = "raw"
"#,
        ))
        .run()
        .expect("runs");

        assert!(!report.is_success());
        let dst = report
            .result(&ComponentId::from_section("DummyComponent.dst"))
            .expect("reported");
        assert_eq!(dst.state, ComponentState::Failed);
        assert_eq!(
            dst.cause.as_ref().map(|c| c.origin.as_str()),
            Some("DummyComponent.src")
        );
    }

    #[test]
    fn cycle_detected_quickly() {
        let start = Instant::now();
        let report = Dispatcher::new(config(
            r#"
[Global]
deadlock_timeout_ms = 200
poll_interval_ms = 10

[DummyComponent.a]
name = "a"
capability_reqs = "b"

[DummyComponent.b]
name = "b"
capability_reqs = "a"
"#,
        ))
        .run()
        .expect("runs");

        assert_eq!(report.deadlock.len(), 2);
        assert_eq!(report.failures().count(), 2);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn general_payload_published_stale() {
        let registry = Arc::new(CapabilityRegistry::new());
        let dispatcher = Dispatcher::new(config("[Global]\nkey = \"v\"\n"));
        dispatcher.instantiate(&registry, &[]).expect("no components");
        let general = registry.acquire_resolved(GENERAL_CAPABILITY).expect("ready");
        assert!(!general.fresh);
        assert_eq!(general.payload.value(), &json!({"key": "v"}));
    }
}
