use std::time::Duration;

use inferlink_core::{Engine, Result, ServerError};
use inferlink_proto::inferlink::v1 as pb;
use prost::Message;
use tracing::{error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Health {
    pub live: bool,
    pub ready: bool,
}

/// Bounded, fixed-interval polling of engine and model readiness.
#[derive(Clone, Copy, Debug)]
pub struct ReadinessGate {
    interval: Duration,
    max_attempts: usize,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 10)
    }
}

impl ReadinessGate {
    pub fn new(interval: Duration, max_attempts: usize) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// One non-blocking check.
    pub fn poll<E: Engine + ?Sized>(&self, engine: &E) -> Result<Health> {
        Ok(Health {
            live: engine.is_live()?,
            ready: engine.is_ready()?,
        })
    }

    pub async fn wait_for_server<E: Engine + ?Sized>(&self, engine: &E) -> Result<Health> {
        for attempt in 1..=self.max_attempts {
            let health = self.poll(engine)?;
            info!(live = health.live, ready = health.ready, attempt, "server health");
            if health.live && health.ready {
                return Ok(health);
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        error!(attempts = self.max_attempts, "failed to find healthy inference server");
        Err(ServerError::ReadinessTimeout {
            what: format!("server '{}'", engine.id()),
            attempts: self.max_attempts,
        })
    }

    pub fn server_status<E: Engine + ?Sized>(&self, engine: &E) -> Result<pb::ServerStatus> {
        Ok(pb::ServerStatus::decode(engine.server_status()?.as_slice())?)
    }

    /// Ready state of `model` at `version`, or at its highest listed
    /// version when `None`.
    pub fn model_state<E: Engine + ?Sized>(
        &self,
        engine: &E,
        model: &str,
        version: Option<i64>,
    ) -> Result<(i64, pb::ModelReadyState)> {
        let status = pb::ServerStatus::decode(engine.model_status(model)?.as_slice())?;
        let invalid = || ServerError::InvalidModel {
            model: model.to_string(),
            version: version.map_or_else(|| "latest".to_string(), |v| v.to_string()),
        };

        let model_status = status.model_status.get(model).ok_or_else(invalid)?;
        let version = match version {
            Some(v) => v,
            None => *model_status.version_status.keys().max().ok_or_else(invalid)?,
        };
        let version_status = model_status.version_status.get(&version).ok_or_else(invalid)?;
        Ok((version, version_status.state()))
    }

    pub async fn wait_for_model<E: Engine + ?Sized>(
        &self,
        engine: &E,
        model: &str,
        version: Option<i64>,
    ) -> Result<i64> {
        for attempt in 1..=self.max_attempts {
            let (resolved, state) = self.model_state(engine, model, version)?;
            info!(model, version = resolved, state = state.as_str_name(), attempt, "model status");
            if state == pb::ModelReadyState::ModelReady {
                return Ok(resolved);
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        error!(model, attempts = self.max_attempts, "model never became ready");
        Err(ServerError::ReadinessTimeout {
            what: format!("model '{model}'"),
            attempts: self.max_attempts,
        })
    }
}
