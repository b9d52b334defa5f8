use anyhow::Result;
use control_plane::models::{AppFilter, AppKey, PodDetail};
use control_plane::Engine;

use super::{print_json, Output, Target};
use crate::errors::CliError;

pub async fn list(engine: &Engine, target: &Target, name: Option<String>, all_namespaces: bool, page: u32, page_size: u32) -> Result<()> {
    let filter = AppFilter {
        cluster: target.cluster.clone(),
        namespace: if all_namespaces { None } else { Some(target.namespace.clone()) },
        name_contains: name,
        page,
        page_size,
    };
    let result = engine.list(&filter).await.map_err(CliError::from)?;
    if target.output == Output::Json { return print_json(&result); }
    println!("NAMESPACE\tNAME\tKIND\tVERSION\tREPLICAS\tREADY");
    for app in &result.items {
        println!("{}\t{}\t{}\t{}\t{}\t{}", app.namespace, app.name, app.kind, app.version, app.replicas, app.ready_replicas);
    }
    println!("({} of {})", result.items.len(), result.total);
    Ok(())
}

fn print_pods(pods: &[PodDetail]) {
    println!("POD\tPHASE\tREADY\tRESTARTS\tVERSION\tWEIGHT");
    for p in pods {
        println!("{}\t{}\t{}\t{}\t{}\t{}", p.name, p.phase, p.ready, p.restarts, p.version, p.weight);
    }
}

pub async fn detail(engine: &Engine, target: &Target, name: &str) -> Result<()> {
    let detail = engine
        .get_detail(&AppKey::new(&target.cluster, &target.namespace, name))
        .await
        .map_err(CliError::from)?;
    if target.output == Output::Json { return print_json(&detail); }
    let app = &detail.application;
    println!("name:      {}/{}", app.namespace, app.name);
    println!("kind:      {}", app.kind);
    println!("image:     {}", app.image);
    println!("version:   {}", app.version);
    println!("status:    {} ({})", detail.status, detail.pod_count);
    if let Some(addr) = &app.default_address { println!("address:   {addr}"); }
    if !app.message.is_empty() { println!("message:   {}", app.message); }
    if !detail.versions.is_empty() {
        println!();
        println!("LINEAGE\tSTAGE\tDECLARED\tEFFECTIVE\tRUNNING");
        for v in &detail.versions {
            println!("{}\t{}\t{}\t{}\t{}", v.pod_version, v.stage.as_str(), v.declared_weight, v.effective_weight, v.running_pods);
        }
        println!("other\t-\t-\t{}\t-", detail.other_weight);
    }
    println!();
    print_pods(&detail.pods);
    Ok(())
}

pub async fn pods(engine: &Engine, target: &Target, name: &str) -> Result<()> {
    let pods = engine
        .get_pod_list(&AppKey::new(&target.cluster, &target.namespace, name))
        .await
        .map_err(CliError::from)?;
    if target.output == Output::Json { return print_json(&pods); }
    print_pods(&pods);
    Ok(())
}

pub async fn backends(engine: &Engine, target: &Target, name: &str, service: &str) -> Result<()> {
    let weights = engine
        .backend_weights(&AppKey::new(&target.cluster, &target.namespace, name), service)
        .await
        .map_err(CliError::from)?;
    if target.output == Output::Json { return print_json(&weights); }
    for (address, weight) in &weights { println!("{address}\t{weight}"); }
    Ok(())
}
