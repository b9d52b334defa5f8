use std::process;
use std::time::Instant;

use anyhow::Result;
use canopy_cli::commands::{self, apps, inspect, offline, versions, Cli, Commands, Target};
use canopy_cli::config::EffectiveConfig;
use canopy_cli::errors::CliError;
use canopy_cli::logging::init_logging;
use clap::Parser;
use tracing::{info, info_span, Instrument};

#[tokio::main]
async fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format)?;
    let cfg = match EffectiveConfig::load() {
        Ok(c) => c,
        Err(e) => {
            let code = classify_exit_code(&e);
            info!(took_ms=%start.elapsed().as_millis(), event="cli.finished", exit_code=code);
            process::exit(code);
        }
    };
    let exit_code = match dispatch(cli, cfg).await { Ok(()) => 0, Err(e) => classify_exit_code(&e) };
    info!(took_ms=%start.elapsed().as_millis(), event="cli.finished", exit_code=exit_code);
    if exit_code != 0 { process::exit(exit_code); }
    Ok(())
}

async fn dispatch(cli: Cli, cfg: EffectiveConfig) -> Result<()> {
    let start = Instant::now();
    let target = Target::resolve(&cli, &cfg);
    let result = match cli.command {
        Commands::Validate { files } => {
            let _span = info_span!("cmd.validate").entered();
            offline::validate(&cfg.engine, &target, &files)
        }
        Commands::Render { file, pod_version } => {
            let _span = info_span!("cmd.render").entered();
            offline::render(&cfg.engine, &target, &file, &pod_version)
        }
        Commands::Metrics {} => offline::metrics(),
        command => run_online(command, &cfg, &target).await,
    };
    let took = start.elapsed().as_millis();
    match &result {
        Ok(_) => info!(event="cmd.finished", took_ms=%took),
        Err(e) => {
            eprintln!("error: {e:#}");
            info!(event="cmd.failed", took_ms=%took);
        }
    }
    result
}

async fn run_online(command: Commands, cfg: &EffectiveConfig, target: &Target) -> Result<()> {
    let engine = commands::connect(cfg).await?;
    let t = target;
    match command {
        Commands::Install { files, force } => apps::install(&engine, t, &files, force).instrument(info_span!("cmd.install", force)).await,
        Commands::Uninstall { name } => apps::uninstall(&engine, t, &name).instrument(info_span!("cmd.uninstall")).await,
        Commands::Reconfigure { name, file, no_ancillary } => {
            apps::reconfigure(&engine, t, &name, &file, !no_ancillary).instrument(info_span!("cmd.reconfigure")).await
        }
        Commands::Restart { name } => apps::restart(&engine, t, &name).instrument(info_span!("cmd.restart")).await,
        Commands::Scale { name, replicas } => apps::scale(&engine, t, &name, replicas).instrument(info_span!("cmd.scale")).await,
        Commands::RollingUpdate { name, images } => {
            apps::rolling_update(&engine, t, &name, &images).instrument(info_span!("cmd.rolling_update")).await
        }
        Commands::BatchRollingUpdate { updates } => {
            apps::batch_rolling_update(&engine, t, &updates).instrument(info_span!("cmd.batch_rolling_update")).await
        }
        Commands::List { name, all_namespaces, page, page_size } => {
            inspect::list(&engine, t, name, all_namespaces, page, page_size).instrument(info_span!("cmd.list")).await
        }
        Commands::Detail { name } => inspect::detail(&engine, t, &name).instrument(info_span!("cmd.detail")).await,
        Commands::Pods { name } => inspect::pods(&engine, t, &name).instrument(info_span!("cmd.pods")).await,
        Commands::Backends { name, service } => {
            inspect::backends(&engine, t, &name, &service).instrument(info_span!("cmd.backends")).await
        }
        Commands::Labels { name, labels } => apps::labels(&engine, t, &name, &labels).instrument(info_span!("cmd.labels")).await,
        Commands::SetVersion { name, weight, stage, pod_version, template, replicas } => {
            let args = versions::SetVersionArgs { weight, stage, pod_version, template, replicas };
            versions::set_version(&engine, t, &name, args).instrument(info_span!("cmd.set_version")).await
        }
        Commands::Validate { .. } | Commands::Render { .. } | Commands::Metrics {} => Ok(()),
    }
}

fn classify_exit_code(e: &anyhow::Error) -> i32 {
    use std::error::Error;
    let mut cur: &dyn Error = e.as_ref();
    loop {
        if let Some(cli) = cur.downcast_ref::<CliError>() {
            tracing::debug!(?cli, code = cli.kind.code(), "classified_cli_error");
            return cli.kind.code();
        }
        if let Some(ioe) = cur.downcast_ref::<std::io::Error>() {
            eprintln!("io error: {ioe}");
            return 30;
        }
        if let Some(src) = cur.source() { cur = src; } else { break; }
    }
    eprintln!("runtime error: {e}");
    20
}
