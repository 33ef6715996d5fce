/*!
 * Protected Operation Kernel - Main Entry Point
 *
 * Assembles a kernel from environment configuration, seeds a demo role
 * graph, runs a self-check operation through the full envelope and then
 * reports metrics until interrupted.
 */

use anyhow::Context;
use opguard_kernel::{
    init_tracing, Kernel, KernelConfig, KernelResult, Operation, OperationDescriptor,
    OperationResult, OperationScope, RoleData, SecurityContext,
};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const OPERATOR: &str = "kernel-operator";
const METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Records a heartbeat row for the kernel itself
struct SelfCheck {
    descriptor: OperationDescriptor,
    input: Value,
}

impl SelfCheck {
    fn new() -> Self {
        Self {
            descriptor: OperationDescriptor::new("kernel.self_check")
                .requires("kernel.self_check")
                .result_field("checked_at"),
            input: json!({}),
        }
    }
}

impl Operation for SelfCheck {
    fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    fn input(&self) -> &Value {
        &self.input
    }

    fn execute(&self, scope: &mut OperationScope<'_>) -> KernelResult<OperationResult> {
        let checked_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let previous = scope.get_for_update("resource:kernel")?;
        let runs = previous
            .as_ref()
            .and_then(|v| v.get("runs"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        scope.put(
            "resource:kernel",
            json!({ "checked_at": checked_at, "runs": runs + 1 }),
        )?;
        Ok(OperationResult::success(json!({ "checked_at": checked_at })))
    }
}

fn seed_roles(kernel: &Kernel) -> KernelResult<()> {
    kernel.create_role(
        RoleData::new("viewer")
            .with_name("Viewer")
            .with_permission("content.read"),
    )?;
    kernel.create_role(
        RoleData::new("editor")
            .with_name("Editor")
            .with_permissions(["content.write", "content.publish"])
            .with_parent("viewer"),
    )?;
    kernel.create_role(
        RoleData::new("operator")
            .with_name("Kernel Operator")
            .with_permission("kernel.*")
            .with_parent("editor"),
    )?;
    kernel.assign_role(OPERATOR, "operator")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Protected operation kernel starting...");
    info!("================================================");

    let config = KernelConfig::from_env().context("loading kernel configuration")?;
    let kernel = Kernel::builder()
        .with_config(config)
        .build()
        .context("assembling kernel")?;

    seed_roles(&kernel).context("seeding demo roles")?;
    info!(
        roles = kernel.permissions().roles().len(),
        policy_version = kernel.permissions().policy_version(),
        "Demo role graph seeded"
    );

    let context = SecurityContext::builder(OPERATOR)
        .resource("kernel")
        .action("self_check")
        .source("127.0.0.1")
        .authenticated_at(SystemTime::now())
        .build();
    match kernel.execute_critical(&SelfCheck::new(), &context) {
        Ok(result) => info!(payload = %result.payload(), "Self-check committed"),
        Err(e) => warn!(error = %e, kind = e.kind().as_str(), "Self-check failed"),
    }

    info!("================================================");
    info!("Kernel ready - press Ctrl+C to exit");

    let mut ticker = tokio::time::interval(METRICS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let metrics = kernel.metrics();
                let cache = kernel.cache_stats();
                info!(
                    uptime_secs = metrics.uptime_secs,
                    counters = ?metrics.counters,
                    cache_size = cache.size,
                    cache_hit_rate = cache.hit_rate,
                    emergency = kernel.emergency().is_some(),
                    "Kernel running"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                }
                break;
            }
        }
    }

    if !kernel.flush(Duration::from_secs(5)) {
        warn!("Audit queue not fully drained at shutdown");
    }
    info!("Kernel stopped");
    Ok(())
}
