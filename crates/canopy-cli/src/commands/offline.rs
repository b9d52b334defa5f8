//! Commands that never touch a cluster or the database.

use std::path::PathBuf;

use anyhow::Result;
use control_plane::telemetry::{gather_text, register_all};
use control_plane::template::parse_template;
use control_plane::EngineConfig;
use tracing::debug;

use super::{print_json, read_file, Output, Target};
use crate::errors::CliError;

pub fn validate(cfg: &EngineConfig, target: &Target, files: &[PathBuf]) -> Result<()> {
    for file in files {
        let raw = read_file(file)?;
        let template = parse_template(&raw, cfg).map_err(CliError::from)?;
        template.validate(cfg).map_err(CliError::from)?;
        debug!(file=%file.display(), app=template.app_name(), "template.valid");
        match target.output {
            Output::Json => print_json(&serde_json::json!({"file": file.display().to_string(), "app": template.app_name(), "version": template.version()}))?,
            Output::Text => println!("ok {}\t{}", template.app_name(), file.display()),
        }
    }
    Ok(())
}

pub fn render(cfg: &EngineConfig, target: &Target, file: &PathBuf, pod_version: &str) -> Result<()> {
    let raw = read_file(file)?;
    let template = parse_template(&raw, cfg).map_err(CliError::from)?;
    template.validate(cfg).map_err(CliError::from)?;
    let objects = template
        .generate_kube_object(&target.cluster, &target.namespace, pod_version, cfg)
        .and_then(|set| set.to_values())
        .map_err(CliError::from)?;
    if target.output == Output::Json { return print_json(&objects); }
    for object in &objects {
        println!("---");
        print!("{}", serde_yaml::to_string(object)?);
    }
    Ok(())
}

pub fn metrics() -> Result<()> {
    register_all();
    print!("{}", gather_text());
    Ok(())
}
