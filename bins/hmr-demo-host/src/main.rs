// SPDX-License-Identifier: Apache-2.0
//! Minimal frame-loop host wiring the four HMR subsystems together. Not a
//! dashboard or CLI tool — just enough of a driver to make the workspace
//! runnable and give the crates' integration tests something to exercise.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hmr_core::config::{ConfigService, FileConfigStore};
use hmr_core::{Fingerprint, HmrConfig, ModuleId, Version};
use hmr_frame::{FrameBudgetConfig, Integrator};
use hmr_orchestrator::{Orchestrator, QualityLevel, Sample};
use hmr_reload::{ModuleHandle, ModuleRegistry, ReloadEngine};
use hmr_watch::pipeline::{AssetKind, Pipeline};

/// How many frames this demo host runs before exiting.
const DEMO_FRAME_COUNT: u64 = 180;
/// Target wall-clock time per simulated frame.
const TARGET_FRAME_TIME: Duration = Duration::from_millis(16);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("HMR_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    info!(cache_root = %config.cache_root.display(), state_root = %config.state_root.display(), "starting hmr-demo-host");

    let registry = ModuleRegistry::new();
    registry.register(
        ModuleId::new("sim"),
        ModuleHandle {
            version: Version::new(0, 1, 0, 0),
            fingerprint: Fingerprint([0u8; 32]),
            artifact_path: PathBuf::from("demo.bin"),
            exported_symbols: HashSet::new(),
            state: Vec::new(),
        },
    );

    let engine = Arc::new(ReloadEngine::new(
        &config.state_root,
        registry,
        hmr_reload::MigrationRegistry::new(),
    ));

    let pipeline = Arc::new(Pipeline::new(&config, None));
    pipeline.register_asset("sim", AssetKind::Module, PathBuf::from("sim.rs"))?;

    let frame_budget = FrameBudgetConfig {
        check_interval_frames: config.check_interval_frames,
        max_frame_budget_ns: config.frame_budget_ns,
        adaptive_budgeting: config.enable_adaptive,
    };
    let integrator = Integrator::with_config(Arc::clone(&engine), frame_budget);

    let orchestrator = Orchestrator::new(Duration::from_millis(50), TARGET_FRAME_TIME, QualityLevel::High);
    orchestrator.register_agent(Arc::new(EngineAgent {
        engine: Arc::clone(&engine),
    }));

    run_frame_loop(&integrator, &orchestrator);

    if let Some(violation) = engine.timing_violations().first() {
        info!(?violation, "engine recorded at least one timing violation during this run");
    }

    Ok(())
}

fn load_config() -> Result<HmrConfig> {
    let path = std::env::var("HMR_CONFIG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| HmrConfig::default().state_root.join("config.toml"));
    let service = ConfigService::new(FileConfigStore::new(path));
    Ok(service.load()?)
}

fn run_frame_loop(integrator: &Integrator, orchestrator: &Orchestrator) {
    for frame_number in 0..DEMO_FRAME_COUNT {
        let frame_started = Instant::now();
        integrator.frame_begin(frame_number);

        match integrator.check_reloads() {
            hmr_frame::CheckResult::Ok => {}
            hmr_frame::CheckResult::BudgetExceeded => {
                info!(frame_number, "reload work carried over past this frame's budget");
            }
            hmr_frame::CheckResult::Paused => {}
        }

        integrator.frame_end();

        let elapsed = frame_started.elapsed();
        let quality = orchestrator.observe_frame_time(elapsed);
        if frame_number.is_multiple_of(60) {
            info!(frame_number, ?elapsed, ?quality, "frame checkpoint");
        }

        if elapsed < TARGET_FRAME_TIME {
            std::thread::sleep(TARGET_FRAME_TIME - elapsed);
        }
    }
}

/// Reports the engine's own timing-violation count as a synthetic agent,
/// so the demo host has at least one real telemetry source wired end to
/// end without inventing a simulation/rendering subsystem out of scope.
struct EngineAgent {
    engine: Arc<ReloadEngine>,
}

impl hmr_orchestrator::Agent for EngineAgent {
    fn agent_id(&self) -> &str {
        "reload-engine"
    }

    fn sample(&self) -> Sample {
        Sample {
            timestamp_ns: 0,
            cpu_percent: 0.0,
            memory_bytes: 0,
            fps: 0.0,
            latency_ns: u64::try_from(self.engine.timing_violations().len()).unwrap_or(u64::MAX),
            throughput_ops: 0.0,
        }
    }
}
