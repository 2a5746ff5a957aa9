//! `cycle`: one scheduling cycle per cycle file.
//!
//! Every file holds a [`SchedulingCycle`] for one resource group. Cycles run
//! as concurrent tasks sharing the provisioner, so they only share the
//! history store and the per-group round-robin cursors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinSet;
use tracing::{info, warn};

use slotgrid_core::SlotgridConfig;
use slotgrid_scheduler::{Provisioner, ScheduleResult, SchedulingCycle, SchedulingHistoryRecorder};
use slotgrid_state::StateStore;

pub fn load_cycle(path: &Path) -> anyhow::Result<SchedulingCycle> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("read cycle file {}", path.display()))?;
    let cycle = serde_json::from_str(&content)
        .with_context(|| format!("parse cycle file {}", path.display()))?;
    Ok(cycle)
}

/// Schedule every cycle file and return the results in file order.
pub async fn schedule_all(
    provisioner: Arc<Provisioner>,
    cycles: Vec<SchedulingCycle>,
) -> anyhow::Result<Vec<ScheduleResult>> {
    let mut tasks = JoinSet::new();
    for (index, cycle) in cycles.into_iter().enumerate() {
        let provisioner = provisioner.clone();
        tasks.spawn(async move {
            let resource_group = cycle.resource_group.clone();
            (index, resource_group, provisioner.schedule_resource_group(cycle).await)
        });
    }

    let mut results = Vec::new();
    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (index, resource_group, outcome) = joined?;
        match outcome {
            Ok(result) => results.push((index, result)),
            Err(e) => {
                warn!(resource_group = %resource_group, error = %e, "scheduling cycle failed");
                failed.push(format!("{resource_group}: {e}"));
            }
        }
    }
    if !failed.is_empty() {
        anyhow::bail!("{} scheduling cycle(s) failed: {}", failed.len(), failed.join("; "));
    }

    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, result)| result).collect())
}

pub async fn run_cycles(
    config: SlotgridConfig,
    store: StateStore,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let cycles = files
        .iter()
        .map(|path| load_cycle(path))
        .collect::<anyhow::Result<Vec<_>>>()?;
    info!(cycles = cycles.len(), "running scheduling cycles");

    let recorder = SchedulingHistoryRecorder::new(Arc::new(store));
    let provisioner = Arc::new(Provisioner::new(Arc::new(config), recorder));
    let results = schedule_all(provisioner, cycles).await?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
