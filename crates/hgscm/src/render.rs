use std::fmt::Write;

use hg::{CommandOutput, GroupName, MergeOutcome, MergeState, PartitionedResources, PushOutcome};

pub fn render_text(output: &CommandOutput) -> String {
    match output {
        CommandOutput::Groups { groups } => render_groups(groups),
        CommandOutput::Merge { outcome, groups } => {
            let mut out = render_merge(outcome);
            out.push_str(&render_groups(groups));
            out
        }
        CommandOutput::Push { outcome } => match outcome {
            PushOutcome::Pushed => "Pushed\n".to_string(),
            PushOutcome::NothingToPush => "Nothing to push\n".to_string(),
        },
        CommandOutput::Text { text } => text.clone(),
        CommandOutput::Done { message } => format!("{message}\n"),
    }
}

fn render_merge(outcome: &MergeOutcome) -> String {
    format!(
        "{} updated, {} merged, {} removed, {} unresolved\n",
        outcome.updated, outcome.merged, outcome.removed, outcome.unresolved
    )
}

fn group_title(name: GroupName) -> &'static str {
    match name {
        GroupName::Conflict => "Merge conflicts",
        GroupName::Staging => "Staged changes",
        GroupName::Merge => "Merged changes",
        GroupName::Working => "Changes",
        GroupName::Untracked => "Untracked files",
    }
}

pub fn render_groups(groups: &PartitionedResources) -> String {
    if groups.is_empty() {
        return "Working directory clean\n".to_string();
    }

    let mut out = String::new();
    for name in GroupName::ALL {
        let resources = groups.group(name);
        if resources.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{} ({}):", group_title(name), resources.len());
        for resource in resources {
            let _ = write!(out, "  {} {}", resource.status().letter(), resource.path());
            if let Some(from) = &resource.record.renamed_from {
                let _ = write!(out, " (from {from})");
            }
            if resource.merge_state == MergeState::Resolved {
                out.push_str(" [resolved]");
            }
            out.push('\n');
        }
    }
    out
}
