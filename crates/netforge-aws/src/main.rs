//! `netforge` command-line interface
//!
//! Validates configurations, prints plans and dependency graphs, and applies
//! topologies against the simulated provider.

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use netforge_aws::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn source_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_parser(value_parser!(PathBuf))
                .help("Topology configuration (.json, .yaml, .yml or .toml)"),
        )
        .arg(
            Arg::new("manifest")
                .long("manifest")
                .short('m')
                .value_parser(value_parser!(PathBuf))
                .help("Resource manifest (YAML or JSON)"),
        )
        .arg(
            Arg::new("compute")
                .long("compute")
                .value_parser(value_parser!(ComputeVariant))
                .help("Override the compute variant: auto_scaling, static_instances or standalone"),
        )
        .group(
            ArgGroup::new("source")
                .args(["config", "manifest"])
                .required(true),
        )
}

fn cli() -> Command {
    Command::new("netforge")
        .version(netforge_kernel::VERSION)
        .about("Declare, plan and apply AWS network topologies")
        .subcommand_required(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format"),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate a topology configuration")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Topology configuration (.json, .yaml, .yml or .toml)"),
                ),
        )
        .subcommand(source_args(
            Command::new("plan").about("Print the realization order, waves and fingerprint"),
        ))
        .subcommand(source_args(
            Command::new("graph").about("Print the dependency graph as Graphviz DOT"),
        ))
        .subcommand(
            source_args(
                Command::new("apply").about("Apply the topology against the simulated provider"),
            )
            .arg(
                Arg::new("concurrency")
                    .long("concurrency")
                    .short('j')
                    .default_value("1")
                    .value_parser(value_parser!(usize))
                    .help("Maximum concurrent realizations"),
            )
            .arg(
                Arg::new("latency-ms")
                    .long("latency-ms")
                    .default_value("0")
                    .value_parser(value_parser!(u64))
                    .help("Simulated per-resource latency in milliseconds"),
            )
            .arg(
                Arg::new("region")
                    .long("region")
                    .default_value("us-east-1")
                    .help("Region used for simulated ARNs and DNS names"),
            )
            .arg(
                Arg::new("json")
                    .long("json")
                    .action(ArgAction::SetTrue)
                    .help("Print the deployment as JSON"),
            ),
        )
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn load_config(args: &ArgMatches) -> Result<TopologyConfig> {
    let path = args
        .get_one::<PathBuf>("config")
        .context("--config is required")?;
    let mut config = TopologyConfig::load(path)
        .with_context(|| format!("failed to load configuration {}", path.display()))?;
    if let Some(compute) = args.try_get_one::<ComputeVariant>("compute").ok().flatten() {
        config = config.with_compute(*compute);
    }
    Ok(config)
}

fn load_graph(args: &ArgMatches) -> Result<ResourceGraph> {
    if let Some(path) = args.get_one::<PathBuf>("manifest") {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest = Manifest::from_yaml(&text)
            .with_context(|| format!("failed to parse manifest {}", path.display()))?;
        return Ok(ResourceGraph::from_manifest(manifest)?);
    }
    let config = load_config(args)?;
    info!(compute = %config.compute, stack = %config.stack_name, "assembling topology");
    Ok(assemble(&config)?)
}

fn validate(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    println!(
        "configuration is valid: vpc {}, subnets {} ({}) and {} ({}), compute {}",
        config.vpc_cidr,
        config.subnet_public_cidr,
        config.availability_zone1,
        config.subnet_private_cidr,
        config.availability_zone2,
        config.compute
    );
    Ok(())
}

fn plan(args: &ArgMatches) -> Result<()> {
    let plan = resolve(&load_graph(args)?)?;

    println!("Plan: {} resource(s)", plan.len());
    for (position, declaration) in plan.iter().enumerate() {
        println!("  {:>3}. {} ({})", position + 1, declaration.name, declaration.kind);
    }
    println!();
    println!("Waves:");
    for (depth, wave) in plan.waves().iter().enumerate() {
        let names: Vec<&str> = wave.iter().map(|decl| decl.name.as_str()).collect();
        println!("  {depth}: {}", names.join(", "));
    }
    if !plan.exports().is_empty() {
        println!();
        println!("Exports:");
        for name in plan.exports().keys() {
            println!("  {name}");
        }
    }
    println!();
    println!("Fingerprint: {}", plan.fingerprint());
    Ok(())
}

fn graph(args: &ArgMatches) -> Result<()> {
    let graph = load_graph(args)?;
    print!("{}", graph.to_dot());
    Ok(())
}

async fn apply(args: &ArgMatches) -> Result<()> {
    let plan = resolve(&load_graph(args)?)?;
    let concurrency = args.get_one::<usize>("concurrency").copied().unwrap_or(1);
    let latency = args.get_one::<u64>("latency-ms").copied().unwrap_or(0);
    let region = args
        .get_one::<String>("region")
        .map_or("us-east-1", String::as_str);

    let mut provider = SimulatedProvider::new().with_region(region);
    if latency > 0 {
        provider = provider.with_latency(Duration::from_millis(latency));
    }
    let executor = Executor::new(Arc::new(provider))
        .with_options(ApplyOptions::default().with_max_concurrency(concurrency));

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling apply");
                cancel.cancel();
            }
        }
    });

    let result = executor.apply_with_cancel(&plan, cancel).await;
    watcher.abort();

    let deployment = match result {
        Ok(deployment) => deployment,
        Err(err) => {
            if !err.realized().is_empty() {
                eprintln!("Resources left realized:");
                for name in err.realized() {
                    eprintln!("  {name}");
                }
            }
            return Err(err.into());
        }
    };

    if args.get_flag("json") {
        let resources: serde_json::Map<String, serde_json::Value> = deployment
            .resources
            .values()
            .map(|resource| {
                (
                    resource.name().to_string(),
                    serde_json::json!({
                        "kind": resource.declaration.kind,
                        "provider_id": resource.provider_id,
                        "attributes": resource.computed_attributes,
                    }),
                )
            })
            .collect();
        let report = serde_json::json!({
            "deployment": deployment.id,
            "started_at": deployment.started_at,
            "elapsed_ms": u64::try_from(deployment.elapsed.as_millis()).unwrap_or(u64::MAX),
            "resources": resources,
            "exports": deployment.exports,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Deployment {} realized {} resource(s) in {:?}",
        deployment.id,
        deployment.resources.len(),
        deployment.elapsed
    );
    for resource in deployment.resources.values() {
        println!(
            "  {} ({}) = {}",
            resource.name(),
            resource.declaration.kind,
            resource.provider_id
        );
    }
    if !deployment.exports.is_empty() {
        println!();
        println!("Outputs:");
        for (name, value) in &deployment.exports {
            println!("  {name} = {value}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    let log_format = matches
        .get_one::<String>("log-format")
        .map_or("text", String::as_str);
    init_tracing(log_format);

    let result = match matches.subcommand() {
        Some(("validate", args)) => validate(args),
        Some(("plan", args)) => plan(args),
        Some(("graph", args)) => graph(args),
        Some(("apply", args)) => apply(args).await,
        _ => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
