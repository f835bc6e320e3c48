//! Periodic system health sampling.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{Module, ModuleFactory};
use crate::constants::{CPU_TEMP_PATH, SYSTEM_STATE_INTERVAL};
use crate::context::ModuleContext;
use crate::error::{MonitorError, MonitorResult};
use crate::runtime::TaskSpawner;

const NAMESPACE: &str = "systemstate";

/// Builds the systemstate module.
#[derive(Debug, Clone)]
pub struct SystemStateFactory {
    temp_path: PathBuf,
    interval: Duration,
}

impl Default for SystemStateFactory {
    fn default() -> Self {
        Self {
            temp_path: PathBuf::from(CPU_TEMP_PATH),
            interval: SYSTEM_STATE_INTERVAL,
        }
    }
}

impl SystemStateFactory {
    /// Samples `temp_path` every `interval` instead of the kernel defaults.
    pub fn with_source(temp_path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            temp_path: temp_path.into(),
            interval,
        }
    }
}

impl ModuleFactory for SystemStateFactory {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn setup(&self, ctx: &ModuleContext) -> MonitorResult<Arc<dyn Module>> {
        Ok(Arc::new(SystemState {
            ctx: ctx.clone(),
            temp_path: self.temp_path.clone(),
            interval: self.interval,
            cancel: ctx.cancel.child_token(),
        }))
    }
}

struct SystemState {
    ctx: ModuleContext,
    temp_path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
}

impl SystemState {
    fn sample(ctx: &ModuleContext, temp_path: &Path) {
        match read_cpu_temp(temp_path) {
            Ok(temp) => {
                ctx.state.set(&format!("{}.cputemp", NAMESPACE), temp);
            }
            Err(e) => log::error!("[SystemState] Could not read CPU temperature: {}", e),
        }
    }
}

#[async_trait]
impl Module for SystemState {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn display_name(&self) -> &str {
        "SystemState"
    }

    async fn start(&self) -> MonitorResult<()> {
        self.ctx.state.set(NAMESPACE, json!({ "cputemp": 0 }));

        let ctx = self.ctx.clone();
        let temp_path = self.temp_path.clone();
        let interval = self.interval;
        let cancel = self.cancel.clone();
        self.ctx
            .spawner
            .spawn_guarded("systemstate sampler".into(), async move {
                loop {
                    Self::sample(&ctx, &temp_path);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                log::debug!("[SystemState] Sampler stopped");
            });
        Ok(())
    }

    async fn stop(&self) -> MonitorResult<()> {
        self.cancel.cancel();
        Ok(())
    }

    async fn command(&self, verb: &str, _payload: Value) -> MonitorResult<bool> {
        match verb {
            "refresh" => {
                Self::sample(&self.ctx, &self.temp_path);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Reads the CPU temperature in whole degrees Celsius.
///
/// The kernel reports millidegrees; values above 200 are scaled down.
fn read_cpu_temp(path: &Path) -> MonitorResult<i64> {
    let raw = std::fs::read_to_string(path)?;
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| MonitorError::Io(format!("unexpected temperature value {:?}", raw.trim())))?;
    let mut temp = value as i64;
    if temp > 200 {
        temp /= 1000;
    }
    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestEngine;

    #[test]
    fn millidegrees_are_scaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        std::fs::write(&path, "48312\n").unwrap();
        assert_eq!(read_cpu_temp(&path).unwrap(), 48);
        std::fs::write(&path, "51").unwrap();
        assert_eq!(read_cpu_temp(&path).unwrap(), 51);
        std::fs::write(&path, "hot").unwrap();
        assert!(read_cpu_temp(&path).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn samples_periodically_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        std::fs::write(&path, "40000").unwrap();

        let engine = TestEngine::new(serde_json::json!({}));
        let factory = SystemStateFactory::with_source(&path, Duration::from_secs(10));
        let module = factory.setup(engine.monitor.registry().context()).unwrap();
        module.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(engine.state.get("systemstate.cputemp"), json!(40));

        std::fs::write(&path, "52000").unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(engine.state.get("systemstate.cputemp"), json!(52));

        module.stop().await.unwrap();
        std::fs::write(&path, "60000").unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(engine.state.get("systemstate.cputemp"), json!(52));
    }
}
