//! Plugin registry and executor
//!
//! Third-party checks implement [`Plugin`] and are registered explicitly at
//! startup. The registry is immutable afterwards and shared as
//! `Arc<PluginRegistry>`.
//!
//! Every execution is isolated: one overall timeout covering all retries,
//! transient errors retried with exponential backoff, panics caught and
//! recorded. `execute_all` never fails; each plugin yields exactly one
//! [`PluginResult`].

pub mod http_check;
pub mod sift;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use onboard_core::config::{PluginSettings, PluginsConfig};
use onboard_core::models::{
    ExecutionStatus, PluginDescriptor, PluginResult, UserProfile, ValidationOutcome,
};
use serde_json::Value;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use uuid::Uuid;

pub use http_check::HttpCheckPlugin;
pub use sift::SiftPlugin;

// ============================================================================
// Capability contract
// ============================================================================

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Fetch third-party data for the profile.
    async fn execute(&self, profile: &UserProfile) -> Result<Value, PluginError>;

    /// Whether the payload has the shape this plugin promises.
    fn validate_response(&self, payload: &Value) -> bool;

    /// Map a valid payload to a risk contribution in `[0, 1]`. `None` means
    /// the payload carries no scorable signal.
    fn normalize(&self, payload: &Value) -> Option<f64>;
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Plugin panicked: {0}")]
    Panicked(String),
}

impl PluginError {
    /// Transport failures are retried; a request that cannot be built or a
    /// body that cannot be decoded will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            PluginError::Transient(_) => true,
            PluginError::Http(e) => !(e.is_builder() || e.is_decode()),
            PluginError::Permanent(_) | PluginError::Panicked(_) => false,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Plugin {name} is misconfigured: {reason}")]
    Misconfigured { name: String, reason: String },
}

// ============================================================================
// Registry
// ============================================================================

struct Registered {
    plugin: Arc<dyn Plugin>,
    settings: PluginSettings,
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Registered>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        plugin: Arc<dyn Plugin>,
        settings: PluginSettings,
    ) -> Result<(), RegistryError> {
        if self.plugins.iter().any(|r| r.plugin.name() == plugin.name()) {
            return Err(RegistryError::DuplicatePlugin(plugin.name().to_string()));
        }

        tracing::info!(
            plugin = %plugin.name(),
            weight = settings.weight,
            timeout_ms = settings.timeout.as_millis() as u64,
            max_retries = settings.max_retries,
            "Registered plugin"
        );

        self.plugins.push(Registered { plugin, settings });
        Ok(())
    }

    /// Build the registry from `[plugins] enabled`.
    ///
    /// `sift` is built in. Any other name is served by the generic HTTP
    /// check when `[plugins.settings.<name>] endpoint` is set.
    pub fn from_config(config: &PluginsConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        for name in &config.enabled {
            let overrides = config.overrides(name);
            let endpoint = overrides.and_then(|o| o.endpoint.clone());

            let plugin: Arc<dyn Plugin> = match (name.as_str(), endpoint) {
                (sift::NAME, _) => Arc::new(SiftPlugin),
                (_, Some(endpoint)) => {
                    let description = overrides
                        .and_then(|o| o.description.clone())
                        .unwrap_or_else(|| format!("HTTP data-source check ({})", endpoint));
                    let check = HttpCheckPlugin::new(name.clone(), description, endpoint)
                        .map_err(|e| RegistryError::Misconfigured {
                            name: name.clone(),
                            reason: e.to_string(),
                        })?;
                    Arc::new(check)
                }
                (http_check::NAME, None) => {
                    return Err(RegistryError::Misconfigured {
                        name: name.clone(),
                        reason: "no endpoint configured".to_string(),
                    })
                }
                (other, None) => return Err(RegistryError::UnknownPlugin(other.to_string())),
            };

            registry.register(plugin, config.resolve(name))?;
        }

        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Configured weight of a plugin; 1.0 for names not registered here.
    pub fn weight_of(&self, name: &str) -> f64 {
        self.plugins
            .iter()
            .find(|r| r.plugin.name() == name)
            .map(|r| r.settings.weight)
            .unwrap_or(1.0)
    }

    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.plugins
            .iter()
            .map(|r| PluginDescriptor {
                name: r.plugin.name().to_string(),
                description: r.plugin.description().to_string(),
                enabled: true,
                weight: r.settings.weight,
                timeout_ms: r.settings.timeout.as_millis() as u64,
                max_retries: r.settings.max_retries,
            })
            .collect()
    }

    /// Run every plugin concurrently; results come back in registration order.
    pub async fn execute_all(&self, profile: &UserProfile) -> Vec<PluginResult> {
        join_all(self.plugins.iter().map(|r| execute_one(r, profile))).await
    }
}

// ============================================================================
// Executor
// ============================================================================

async fn execute_one(entry: &Registered, profile: &UserProfile) -> PluginResult {
    let plugin = entry.plugin.as_ref();
    let settings = &entry.settings;
    let started = Instant::now();
    let attempts = AtomicU32::new(0);

    let retry_strategy = ExponentialBackoff::from_millis(settings.retry_delay_ms.max(1))
        .max_delay(Duration::from_secs(2))
        .map(jitter)
        .take(settings.max_retries);

    let run = RetryIf::spawn(
        retry_strategy,
        || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                match AssertUnwindSafe(plugin.execute(profile)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => Err(PluginError::Panicked(panic_message(panic.as_ref()))),
                }
            }
        },
        |e: &PluginError| e.is_transient(),
    );

    let outcome = tokio::time::timeout(settings.timeout, run).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    let attempts = attempts.load(Ordering::SeqCst);

    let mut result = PluginResult {
        id: Uuid::new_v4(),
        plugin_name: plugin.name().to_string(),
        payload: Value::Null,
        validation: ValidationOutcome::NotChecked,
        status: ExecutionStatus::Error,
        error: None,
        attempts,
        contribution: None,
        latency_ms,
    };

    match outcome {
        Err(_) => {
            tracing::warn!(
                plugin = %result.plugin_name,
                attempts,
                timeout_ms = settings.timeout.as_millis() as u64,
                "Plugin timed out"
            );
            result.status = ExecutionStatus::Timeout;
            result.error = Some(format!(
                "timed out after {}ms",
                settings.timeout.as_millis()
            ));
        }
        Ok(Err(e)) => {
            tracing::warn!(plugin = %result.plugin_name, attempts, "Plugin failed: {}", e);
            result.error = Some(e.to_string());
        }
        Ok(Ok(payload)) => {
            result.status = ExecutionStatus::Success;
            if plugin.validate_response(&payload) {
                result.validation = ValidationOutcome::Valid;
                result.contribution = plugin.normalize(&payload).map(|c| c.clamp(0.0, 1.0));
            } else {
                tracing::warn!(plugin = %result.plugin_name, "Plugin returned an invalid payload");
                result.validation = ValidationOutcome::Invalid;
            }
            result.payload = payload;
            tracing::debug!(
                plugin = %result.plugin_name,
                attempts,
                latency_ms,
                validation = %result.validation.as_str(),
                "Plugin executed"
            );
        }
    }

    result
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
