//! Workspace and context commands.

use anyhow::Result;
use cpc_core::{cpc_info, cpc_println, cpc_success, cpc_warning, CpcError};
use cpc_orchestrator::WorkspaceDetails;

use super::App;
use crate::cli::WorkspaceSubcommand;

pub async fn handle_workspace_command(app: &App, command: WorkspaceSubcommand) -> Result<()> {
    match command {
        WorkspaceSubcommand::Create { name, letter } => {
            let ws = app.manager.create(&name, letter)?;
            if app.json {
                return app.print_json(&ws);
            }
            cpc_success!(
                "Created workspace '{}' (index {}, release letter {})",
                ws.name,
                ws.index,
                ws.release_letter
            );
        }
        WorkspaceSubcommand::Clone {
            template,
            name,
            letter,
        } => {
            let ws = app.manager.clone_from(&template, &name, letter)?;
            if app.json {
                return app.print_json(&ws);
            }
            cpc_success!(
                "Cloned '{}' into '{}' (index {}, release letter {})",
                template,
                ws.name,
                ws.index,
                ws.release_letter
            );
        }
        WorkspaceSubcommand::Delete { name, force } => {
            let ws = app.manager.delete(&name, force).await?;
            cpc_success!("Deleted workspace '{}', index {} is free", ws.name, ws.index);
        }
        WorkspaceSubcommand::List => {
            let workspaces = app.manager.list()?;
            if app.json {
                return app.print_json(&workspaces);
            }
            print_table(&workspaces);
        }
        WorkspaceSubcommand::Show { name } => {
            let name = app.workspace(name.as_deref())?;
            let details = app.manager.show(&name)?;
            if app.json {
                return app.print_json(&details);
            }
            print_details(&details);
        }
        WorkspaceSubcommand::Set {
            key,
            value,
            workspace,
            unset,
        } => {
            let name = app.workspace(workspace.as_deref())?;
            match (value, unset) {
                (Some(value), false) => {
                    app.manager.set_overlay(&name, &key, Some(&value))?;
                    cpc_success!("Set {key}={value} on '{name}'");
                }
                (None, true) => {
                    app.manager.set_overlay(&name, &key, None)?;
                    cpc_success!("Removed {key} from '{name}'");
                }
                _ => anyhow::bail!(CpcError::input(
                    "Pass a value to set, or --unset to remove the key"
                )),
            }
        }
        WorkspaceSubcommand::Compact => {
            let (before, after) = app.manager.compact()?;
            cpc_success!("Compacted registry log: {before} lines -> {after}");
        }
    }
    Ok(())
}

/// `cpc ctx [name]`
pub fn handle_ctx(app: &App, name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => {
            let ws = app.manager.switch(name)?;
            cpc_success!("Switched to workspace '{}'", ws.name);
        }
        None => match app.manager.current()? {
            Some(current) => cpc_println!("{current}"),
            None => cpc_info!("No active workspace; run `cpc ctx <name>` to select one"),
        },
    }
    Ok(())
}

fn print_table(workspaces: &[WorkspaceDetails]) {
    if workspaces.is_empty() {
        cpc_info!("No workspaces yet; create one with `cpc workspace create <name>`");
        return;
    }

    cpc_println!(
        "{:<2}{:<20} {:<6} {:<7} {:<28} {:<6}",
        "",
        "NAME",
        "INDEX",
        "LETTER",
        "BLOCK",
        "NODES"
    );
    for details in workspaces {
        let ws = &details.workspace;
        cpc_println!(
            "{:<2}{:<20} {:<6} {:<7} {:<28} {:<6}",
            if details.active { "*" } else { "" },
            ws.name,
            ws.index,
            ws.release_letter,
            details.block,
            details.addresses.len()
        );
    }
}

fn print_details(details: &WorkspaceDetails) {
    let ws = &details.workspace;
    cpc_println!("Workspace:      {}", ws.name);
    cpc_println!("Index:          {}", ws.index);
    cpc_println!("Release letter: {}", ws.release_letter);
    cpc_println!("Block:          {}", details.block);
    if let Some(template) = &ws.cloned_from {
        cpc_println!("Cloned from:    {template}");
    }
    if details.protected {
        cpc_println!("Protected:      yes (base workspace)");
    }
    if !ws.overlay.is_empty() {
        cpc_println!("Overlay:");
        for (key, value) in &ws.overlay {
            cpc_println!("  {key} = {value}");
        }
    }
    if details.addresses.is_empty() {
        cpc_warning!("No nodes issued yet");
    } else {
        cpc_println!("Nodes:");
        super::node::print_nodes(&details.addresses);
    }
}
