//! `keel plan` - show what apply would do

use anyhow::{Context as _, Result};
use reconcile::{observe, reconcile};

use super::Outcome;
use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::differ;
use crate::{config, host, ui};

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<Outcome> {
    let stack = config::load(ctx.file.as_deref())?;
    let plan = &stack.plan;
    let host = host::connect(plan)?;

    if !ctx.quiet {
        ui::header(&format!("Plan for stack '{}'", plan.name));
        ui::kv("File", &stack.path.display().to_string());
    }

    let observed = observe(plan, &host.caps).context("Could not observe host state")?;
    let actions = reconcile(plan, &observed);
    differ::display_actions(&actions);

    if args.diff {
        match &host.proxy {
            Some(proxy) => {
                let active = proxy
                    .active_config()
                    .with_context(|| format!("Could not read {}", proxy.config_path().display()))?;
                let rendered = proxy.render(&plan.routes());
                let lines = differ::proxy_diff(active.as_deref(), &rendered);
                differ::display_proxy_diff(&proxy.config_path().display().to_string(), &lines);
            }
            None => ui::dim("No proxy configured for this stack"),
        }
    }

    Ok(Outcome::Success)
}
