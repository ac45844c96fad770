// SPDX-License-Identifier: GPL-3.0-or-later

//! VE — a toolkit for building clustered, multi-display virtual-reality
//! applications: CAVEs, tiled walls, powerwalls, and head-mounted
//! displays driven by clusters of graphics nodes.
//!
//! The crate is organized around four components: [`transport`] (C1,
//! the dual-channel connection and slave-spawning machinery),
//! [`coordinator`] (C2, the MP coordinator that tracks slaves and
//! replicates state each frame), [`device`] (C3, the typed device-event
//! pipeline), and [`env`] (C4, the environment/profile data model).
//! [`Session`] wires all four together behind one entry point, per the
//! design note against scattering coordinator state across implicit
//! globals.

pub mod cli;
pub mod coordinator;
pub mod device;
pub mod env;
pub mod error;
pub mod logging;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use coordinator::Coordinator;
use device::{CallbackRegistry, EventQueue};
use env::{Environment, UserProfile};
use error::{CoordinatorError, DebugFlags};

/// The session handle an application builds once at startup and holds
/// for its lifetime. Bundles the MP coordinator, the device-event
/// queue and callback registry, and the active environment/profile, so
/// call sites pass one handle instead of threading four collaborators
/// separately.
pub struct Session {
    pub coordinator: Arc<Coordinator>,
    pub events: Arc<EventQueue>,
    pub callbacks: Arc<CallbackRegistry>,
    pub environment: Environment,
    pub profile: UserProfile,
    pub debug: DebugFlags,
}

impl Session {
    /// Initializes a session from the process's own argv (§4.1
    /// `slave_init`, §6 `-ve_opt`/`-ve_debug`). Must be called exactly
    /// once, as early as possible, on every process — master or slave.
    pub fn init(argv: &[String], environment: Environment, profile: UserProfile) -> Result<Self, CoordinatorError> {
        let (cli_args, _app_args) = cli::parse(argv).map_err(|e| {
            CoordinatorError::BringUpFailed("cli".into(), "parse".into(), e.to_string())
        })?;

        let mut environment = environment;
        for (name, value) in &cli_args.options {
            environment.options.set(name.clone(), value.clone());
        }

        let coordinator = Coordinator::init(argv)?;
        info!(
            master = coordinator.is_master(),
            debug = ?cli_args.debug,
            "session initialized"
        );

        Ok(Session {
            coordinator,
            events: Arc::new(EventQueue::new()),
            callbacks: Arc::new(CallbackRegistry::new()),
            environment,
            profile,
            debug: cli_args.debug,
        })
    }

    /// Drains and dispatches every event currently queued, then runs
    /// one frame's worth of MP replication (§4.2 "Frame replication").
    /// Typically called once per render tick.
    pub fn tick(&self) -> Result<(), CoordinatorError> {
        while let Some(event) = self.events.pop() {
            self.callbacks.dispatch(&event);
        }
        self.coordinator.push_frame()
    }

    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }

    /// Runs the consumer loop: a `calloop::EventLoop` driven by a
    /// repeating timer that calls [`Self::tick`] every
    /// `frame_interval` (§5 "the coordinator's consumer loop is a
    /// `calloop::EventLoop`"). Blocks forever; intended for the
    /// application's main thread.
    pub fn run(&self, frame_interval: Duration) -> Result<(), CoordinatorError> {
        let mut event_loop: calloop::EventLoop<()> = calloop::EventLoop::try_new()
            .map_err(|e| CoordinatorError::BringUpFailed("calloop".into(), "init".into(), e.to_string()))?;

        let timer = calloop::timer::Timer::from_duration(frame_interval);
        event_loop
            .handle()
            .insert_source(timer, move |_deadline, _, _| {
                if let Err(e) = self.tick() {
                    warn!(error = %e, "frame tick failed");
                }
                calloop::timer::TimeoutAction::ToDuration(frame_interval)
            })
            .map_err(|e| CoordinatorError::BringUpFailed("calloop".into(), "timer".into(), e.to_string()))?;

        event_loop
            .run(None, &mut (), |_| {})
            .map_err(|e| CoordinatorError::BringUpFailed("calloop".into(), "run".into(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Environment, UserProfile};

    #[test]
    fn session_init_applies_ve_opt_to_environment() {
        let argv = vec![
            "ve_test".to_string(),
            "-ve_opt".to_string(),
            "renderer".to_string(),
            "gl".to_string(),
        ];
        let session = Session::init(&argv, Environment::new("cave"), UserProfile::new("default"))
            .expect("session init");
        assert_eq!(session.environment.options.get_str("renderer"), Some("gl"));
        assert!(session.coordinator.is_master());
    }
}
