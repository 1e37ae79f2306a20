//! Terminal confirmation of a submission plan.

use std::fmt::Write as _;

use dialoguer::Confirm;
use tracing::warn;

use tunnelmap_core::InstanceRole;

use crate::application::plan::SubmissionPlan;
use crate::application::submit::Confirmer;

/// Renders the plan as the operator sees it before confirming.
///
/// ```text
/// m1 (https://master1.example.com:9090/api)  [handshake listener]
///   server  web-in   server://0.0.0.0:10000/127.0.0.1:8080
/// ```
pub fn render_plan(plan: &SubmissionPlan, listen_master: &str) -> String {
    let mut out = String::new();
    for (master_id, instances) in &plan.groups {
        let api_url = plan
            .masters
            .get(master_id)
            .map(|m| m.api_url.as_str())
            .unwrap_or_default();
        let marker = if master_id == listen_master {
            "  [handshake listener]"
        } else {
            ""
        };
        let _ = writeln!(out, "{master_id} ({api_url}){marker}");

        let label_width = instances.iter().map(|i| i.label.len()).max().unwrap_or(0);
        for instance in instances {
            let role = match instance.role {
                InstanceRole::Server => "server",
                InstanceRole::Client => "client",
            };
            let _ = writeln!(
                out,
                "  {role}  {:<label_width$}  {}",
                instance.label, instance.url
            );
        }
    }
    if !plan.existing.is_empty() {
        let _ = writeln!(out, "{} node(s) already running", plan.existing.len());
    }
    if !plan.excluded.is_empty() {
        let _ = writeln!(out, "{} node(s) excluded", plan.excluded.len());
    }
    out
}

/// [`Confirmer`] backed by an interactive yes/no prompt.
#[derive(Debug, Clone, Default)]
pub struct TerminalConfirmer {
    /// Skip the prompt and accept every plan (`--yes`).
    pub assume_yes: bool,
}

impl TerminalConfirmer {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl Confirmer for TerminalConfirmer {
    fn confirm(&self, plan: &SubmissionPlan, listen_master: &str) -> bool {
        print!("{}", render_plan(plan, listen_master));
        if self.assume_yes {
            return true;
        }
        let prompt = format!(
            "Create {} instance(s) on {} master(s)?",
            plan.instance_count(),
            plan.groups.len()
        );
        match Confirm::new().with_prompt(prompt).default(false).interact() {
            Ok(answer) => answer,
            Err(e) => {
                // No terminal attached: treat as a refusal.
                warn!("confirmation prompt failed: {e}");
                false
            }
        }
    }
}
