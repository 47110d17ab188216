//! `cpc config`

use anyhow::Result;
use cpc_core::{cpc_println, user_paths};

use super::App;
use crate::cli::ConfigSubcommand;

pub fn handle_config_command(app: &App, command: ConfigSubcommand) -> Result<()> {
    match command {
        ConfigSubcommand::Show => {
            if app.json {
                return app.print_json(&app.config);
            }
            cpc_println!("{}", serde_yaml_ng::to_string(&app.config)?.trim_end());
        }
        ConfigSubcommand::Paths => {
            let config_path = match &app.config_path {
                Some(path) => path.clone(),
                None => user_paths::global_config_path()?,
            };
            let registry_log = app.gateway.registry().log_path().to_path_buf();
            let context = app.gateway.registry().context().path().to_path_buf();
            if app.json {
                return app.print_json(&serde_json::json!({
                    "config": config_path,
                    "state_dir": app.state_dir,
                    "registry_log": registry_log,
                    "context": context,
                }));
            }
            cpc_println!("Config:       {}", config_path.display());
            cpc_println!("State dir:    {}", app.state_dir.display());
            cpc_println!("Registry log: {}", registry_log.display());
            cpc_println!("Context file: {}", context.display());
        }
    }
    Ok(())
}
