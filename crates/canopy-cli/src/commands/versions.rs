use std::path::PathBuf;

use anyhow::Result;
use control_plane::models::{AppKey, Stage};
use control_plane::{Engine, SetVersionRequest};

use super::{print_json, read_file, Output, Target};
use crate::errors::CliError;

pub struct SetVersionArgs {
    pub weight: i32,
    pub stage: String,
    pub pod_version: Option<String>,
    pub template: Option<PathBuf>,
    pub replicas: Option<i32>,
}

pub async fn set_version(engine: &Engine, target: &Target, name: &str, args: SetVersionArgs) -> Result<()> {
    let stage: Stage = args.stage.parse().map_err(CliError::from)?;
    let template = args.template.as_ref().map(read_file).transpose()?;
    let req = SetVersionRequest { pod_version: args.pod_version, stage, weight: args.weight, template, replicas: args.replicas };
    let versions = engine
        .set_version(&AppKey::new(&target.cluster, &target.namespace, name), req)
        .await
        .map_err(CliError::from)?;
    if target.output == Output::Json { return print_json(&versions); }
    println!("LINEAGE\tSTAGE\tWEIGHT\tREPLICAS");
    for v in &versions {
        println!("{}\t{}\t{}\t{}", v.pod_version, v.stage.as_str(), v.weight, v.replicas);
    }
    Ok(())
}
