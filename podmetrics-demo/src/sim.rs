//! A simulated container runtime.
//!
//! Containers burn a slowly oscillating share of a four-CPU host and grow
//! their network and block counters steadily. With churn enabled, every
//! `churn_every` cycles one container is removed outright, one is stopped,
//! and a fresh one is started, which exercises reconciliation.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use podmetrics::error::SourceError;
use podmetrics::normalize::{BlockCounters, InterfaceCounters};
use podmetrics::{RawSample, SampleSource};
use tracing::info;

/// CPUs of the simulated host.
const HOST_CPUS: u32 = 4;

/// One simulated container.
#[derive(Debug, Clone)]
struct SimContainer {
    running: bool,
    phase: f64,
    cpu_time_ns: u64,
    memory_usage_bytes: u64,
    memory_limit_bytes: u64,
    network: InterfaceCounters,
    block: BlockCounters,
}

#[derive(Debug, Default)]
struct SimState {
    containers: BTreeMap<String, SimContainer>,
    system_time_ns: u64,
    cycle: u64,
    next_serial: u64,
}

/// Runtime stand-in implementing [`SampleSource`].
#[derive(Debug)]
pub struct SimulatedRuntime {
    state: Mutex<SimState>,
    churn_every: u64,
    tick_ns: u64,
}

impl SimulatedRuntime {
    /// Starts `containers` containers. `churn_every = 0` disables churn.
    pub fn new(containers: usize, churn_every: u64, poll_secs: u64) -> Self {
        let runtime = Self {
            state: Mutex::new(SimState::default()),
            churn_every,
            tick_ns: poll_secs.max(1) * 1_000_000_000 * u64::from(HOST_CPUS),
        };
        {
            let mut state = runtime.lock();
            for _ in 0..containers {
                start_container(&mut state);
            }
        }
        runtime
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advances the simulation by one poll cycle.
    fn tick(&self) {
        let mut state = self.lock();
        state.cycle += 1;
        state.system_time_ns += self.tick_ns;

        let cycle = state.cycle;
        let tick_ns = self.tick_ns;
        for container in state.containers.values_mut().filter(|c| c.running) {
            let share = cpu_share(cycle, container.phase);
            container.cpu_time_ns += scaled(tick_ns, share);
            container.memory_usage_bytes = (container.memory_usage_bytes + 4096)
                .min(container.memory_limit_bytes);
            container.network.rx_bytes += 1500 * (1 + cycle % 7);
            container.network.tx_bytes += 900 * (1 + cycle % 5);
            container.block.read_bytes += 4096 * (cycle % 3);
            container.block.write_bytes += 8192;
        }

        if self.churn_every > 0 && cycle.is_multiple_of(self.churn_every) {
            churn(&mut state);
        }
    }
}

#[async_trait]
impl SampleSource for SimulatedRuntime {
    async fn list_containers(&self, all: bool) -> Result<Vec<String>, SourceError> {
        // The sampling loop lists running containers once per cycle.
        if !all {
            self.tick();
        }

        let state = self.lock();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| all || c.running)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn container_stats(&self, id: &str) -> Result<RawSample, SourceError> {
        let state = self.lock();
        let container = state
            .containers
            .get(id)
            .filter(|c| c.running)
            .ok_or_else(|| SourceError::Stats {
                container_id: id.to_string(),
                reason: "container is not running".to_string(),
            })?;

        Ok(RawSample {
            container_id: id.to_string(),
            cpu_time_ns: container.cpu_time_ns,
            system_time_ns: state.system_time_ns,
            online_cpus: Some(HOST_CPUS),
            memory_usage_bytes: container.memory_usage_bytes,
            memory_limit_bytes: container.memory_limit_bytes,
            networks: vec![container.network],
            block_devices: vec![container.block],
        })
    }
}

fn start_container(state: &mut SimState) -> String {
    state.next_serial += 1;
    let serial = state.next_serial;
    let id = container_id(serial);

    #[allow(clippy::cast_precision_loss)] // small serials
    let phase = serial as f64 * 1.7;
    state.containers.insert(
        id.clone(),
        SimContainer {
            running: true,
            phase,
            cpu_time_ns: 0,
            memory_usage_bytes: 32 << 20,
            memory_limit_bytes: (256 << 20) * (1 + serial % 4),
            network: InterfaceCounters::default(),
            block: BlockCounters::default(),
        },
    );
    id
}

fn churn(state: &mut SimState) {
    let running: Vec<String> = state
        .containers
        .iter()
        .filter(|(_, c)| c.running)
        .map(|(id, _)| id.clone())
        .collect();

    if let Some(removed) = running.first() {
        state.containers.remove(removed);
        info!(container_id = %&removed[..12], "simulated container removed");
    }
    if let Some(stopped) = running.get(1)
        && let Some(container) = state.containers.get_mut(stopped)
    {
        container.running = false;
        info!(container_id = %&stopped[..12], "simulated container stopped");
    }

    let started = start_container(state);
    info!(container_id = %&started[..12], "simulated container started");
}

/// A 64-hex-char id derived from a serial number.
fn container_id(serial: u64) -> String {
    let mut x = serial.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (0..4)
        .map(|_| {
            x ^= x >> 31;
            x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
            format!("{x:016x}")
        })
        .collect()
}

/// Share of the host, between 0.05 and 0.45.
#[allow(clippy::cast_precision_loss)]
fn cpu_share(cycle: u64, phase: f64) -> f64 {
    0.25 + 0.2 * (cycle as f64 / 12.0 + phase).sin()
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)] // share is in [0, 1]
fn scaled(ns: u64, share: f64) -> u64 {
    (ns as f64 * share) as u64
}
