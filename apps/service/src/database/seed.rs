use std::collections::BTreeSet;

use anyhow::Result;
use monitor::{Target, TargetRegistry, TargetSpec};
use tracing::info;

pub const DEMO_TARGET_URL: &str = "https://api.github.com/";

/// Make sure the demo target exists, creating it if no target probes its URL yet
pub async fn seed_demo_target(registry: &dyn TargetRegistry) -> Result<Target> {
    if let Some(existing) =
        registry.list_targets().await?.into_iter().find(|t| t.spec.url == DEMO_TARGET_URL)
    {
        return Ok(existing);
    }

    let mut spec = TargetSpec::new("GitHub API Root", DEMO_TARGET_URL);
    spec.interval_s = 60;
    spec.timeout_ms = 3000;
    spec.expected_statuses = BTreeSet::from([200]);

    let target = Target::from_spec(spec);
    registry.add_target(&target).await?;

    info!(target_id = %target.id, url = DEMO_TARGET_URL, "seeded demo target");
    Ok(target)
}
