//! Compilation progress tracking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, select, Sender};
use dashmap::DashMap;

use crate::builder::{BuildFractionEstimate, DependencyGraphBuilder};

// =============================================================================
// COMPLETION ESTIMATE
// =============================================================================

/// Latest build fraction of every configuration of a compilation.
///
/// Purely informational.
#[derive(Debug, Default)]
pub struct CompilationCompletionEstimate {
    fractions: DashMap<String, f64>,
}

impl CompilationCompletionEstimate {
    /// Creates an empty estimate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a configuration at 0.0.
    pub fn register(&self, calculation_configuration_name: &str) {
        self.fractions
            .entry(calculation_configuration_name.to_string())
            .or_insert(0.0);
    }

    /// Records an observation. Returns true while the configuration should
    /// still be watched.
    pub fn tick(&self, calculation_configuration_name: &str, fraction: f64) -> bool {
        let fraction = fraction.clamp(0.0, 1.0);
        self.fractions
            .insert(calculation_configuration_name.to_string(), fraction);
        fraction < 1.0
    }

    /// Final observation for a cancelled configuration; the last value stays.
    pub fn cancelled(&self, calculation_configuration_name: &str) {
        tracing::debug!(
            config = calculation_configuration_name,
            fraction = self.fraction(calculation_configuration_name).unwrap_or(0.0),
            "Stopped tracking cancelled configuration"
        );
    }

    /// Final observation for a configuration that finished.
    pub fn completed(&self, calculation_configuration_name: &str, fraction: f64) {
        self.fractions.insert(
            calculation_configuration_name.to_string(),
            fraction.clamp(0.0, 1.0),
        );
    }

    /// Fraction of one configuration.
    pub fn fraction(&self, calculation_configuration_name: &str) -> Option<f64> {
        self.fractions
            .get(calculation_configuration_name)
            .map(|entry| *entry.value())
    }

    /// Mean fraction over every configuration; 0.0 when none are tracked.
    pub fn estimate(&self) -> f64 {
        if self.fractions.is_empty() {
            return 0.0;
        }
        let total: f64 = self.fractions.iter().map(|entry| *entry.value()).sum();
        total / self.fractions.len() as f64
    }

    /// Fraction per configuration.
    pub fn estimates(&self) -> BTreeMap<String, f64> {
        self.fractions
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

// =============================================================================
// HOUSEKEEPER
// =============================================================================

/// Background observer copying a builder's progress into an estimate.
///
/// Stops by itself once the builder completes or is cancelled; dropping the
/// housekeeper stops it too.
pub struct Housekeeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Housekeeper {
    /// Starts watching a builder.
    pub fn start(
        builder: &DependencyGraphBuilder,
        estimate: Arc<CompilationCompletionEstimate>,
        interval: Duration,
    ) -> Self {
        let name = builder.calculation_configuration_name().to_string();
        estimate.register(&name);

        let fraction = builder.build_fraction_estimate();
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);
        let thread_name = format!("vista-housekeeper-{name}");

        let spawned = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || loop {
                select! {
                    recv(ticker) -> _ => {
                        if !observe(&name, &fraction, &estimate) {
                            break;
                        }
                    }
                    recv(stop_rx) -> _ => {
                        observe(&name, &fraction, &estimate);
                        break;
                    }
                }
            });

        match spawned {
            Ok(handle) => Self {
                stop: Some(stop_tx),
                handle: Some(handle),
            },
            Err(err) => {
                tracing::warn!(
                    config = builder.calculation_configuration_name(),
                    error = %err,
                    "Unable to start progress housekeeper"
                );
                Self {
                    stop: None,
                    handle: None,
                }
            }
        }
    }

    /// Stops watching and waits for the observer thread.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Housekeeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Returns false once the builder no longer needs watching.
fn observe(name: &str, fraction: &BuildFractionEstimate, estimate: &CompilationCompletionEstimate) -> bool {
    if fraction.is_cancelled() {
        estimate.cancelled(name);
        return false;
    }
    let value = fraction.get();
    if estimate.tick(name, value) {
        return true;
    }
    estimate.completed(name, value);
    tracing::debug!(config = name, "Progress tracking finished");
    false
}
