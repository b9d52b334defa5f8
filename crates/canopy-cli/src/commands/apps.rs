use std::path::PathBuf;

use anyhow::Result;
use control_plane::models::{AppKey, Application, ContainerImage, Labels};
use control_plane::{Engine, InstallRequest};
use tracing::info;

use super::{print_json, read_file, usage, Output, Target};
use crate::errors::CliError;

fn print_app(app: &Application, output: Output) -> Result<()> {
    match output {
        Output::Json => print_json(app),
        Output::Text => {
            println!("{}/{}\t{}\t{}\treplicas={}\tpod_version={}", app.namespace, app.name, app.kind, app.image, app.replicas, app.pod_version);
            Ok(())
        }
    }
}

fn key(target: &Target, name: &str) -> AppKey { AppKey::new(&target.cluster, &target.namespace, name) }

pub async fn install(engine: &Engine, target: &Target, files: &[PathBuf], force: bool) -> Result<()> {
    let templates = files.iter().map(read_file).collect::<Result<Vec<_>>>()?;
    let req = InstallRequest { cluster: target.cluster.clone(), namespace: target.namespace.clone(), templates, force };
    let apps = engine.install(req).await.map_err(CliError::from)?;
    info!(count = apps.len(), "install.done");
    for app in &apps { print_app(app, target.output)?; }
    Ok(())
}

pub async fn uninstall(engine: &Engine, target: &Target, name: &str) -> Result<()> {
    engine.uninstall(&key(target, name)).await.map_err(CliError::from)?;
    println!("uninstalled {}/{name}", target.namespace);
    Ok(())
}

pub async fn reconfigure(engine: &Engine, target: &Target, name: &str, file: &PathBuf, update_ancillary: bool) -> Result<()> {
    let raw = read_file(file)?;
    let app = engine.reconfigure(&key(target, name), &raw, update_ancillary).await.map_err(CliError::from)?;
    print_app(&app, target.output)
}

pub async fn restart(engine: &Engine, target: &Target, name: &str) -> Result<()> {
    let app = engine.restart(&key(target, name)).await.map_err(CliError::from)?;
    print_app(&app, target.output)
}

pub async fn scale(engine: &Engine, target: &Target, name: &str, replicas: i32) -> Result<()> {
    let app = engine.scale(&key(target, name), replicas).await.map_err(CliError::from)?;
    print_app(&app, target.output)
}

fn parse_images(raw: &[String]) -> Result<Vec<ContainerImage>> {
    raw.iter().map(|s| s.parse::<ContainerImage>().map_err(|e| CliError::from(e).into())).collect()
}

pub async fn rolling_update(engine: &Engine, target: &Target, name: &str, images: &[String]) -> Result<()> {
    let images = parse_images(images)?;
    let app = engine.rolling_update(&key(target, name), &images).await.map_err(CliError::from)?;
    print_app(&app, target.output)
}

/// Group `app/container=image` entries by application, keeping first-seen order.
pub fn group_updates(raw: &[String]) -> Result<Vec<(String, Vec<ContainerImage>)>> {
    let mut grouped: Vec<(String, Vec<ContainerImage>)> = Vec::new();
    for entry in raw {
        let Some((app, image)) = entry.split_once('/') else {
            return Err(usage(format!("expected app/container=image, got '{entry}'")));
        };
        let image = image.parse::<ContainerImage>().map_err(CliError::from)?;
        match grouped.iter_mut().find(|(name, _)| name == app) {
            Some((_, images)) => images.push(image),
            None => grouped.push((app.to_string(), vec![image])),
        }
    }
    Ok(grouped)
}

pub async fn batch_rolling_update(engine: &Engine, target: &Target, updates: &[String]) -> Result<()> {
    let updates = group_updates(updates)?;
    let apps = engine
        .batch_rolling_update(&target.cluster, &target.namespace, updates)
        .await
        .map_err(CliError::from)?;
    for app in &apps { print_app(app, target.output)?; }
    Ok(())
}

pub async fn labels(engine: &Engine, target: &Target, name: &str, raw: &[String]) -> Result<()> {
    let mut labels = Labels::new();
    for entry in raw {
        match entry.split_once('=') {
            Some((k, v)) if !k.is_empty() => { labels.insert(k.to_string(), v.to_string()); }
            _ => return Err(usage(format!("expected key=value, got '{entry}'"))),
        }
    }
    let app = engine.set_labels(&key(target, name), &labels).await.map_err(CliError::from)?;
    print_app(&app, target.output)
}
