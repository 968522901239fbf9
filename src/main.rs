use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use shader_forge::{
    dsl,
    resolver::{NamingPolicy, ResolvedModule},
};
use tracing::{Level, info};

#[derive(Debug, Default, Clone)]
struct Cli {
    graph: Option<PathBuf>,
    names: Option<NamingPolicy>,
    validate: bool,
    out: Option<PathBuf>,
    verbose: bool,
}

const USAGE: &str = "--graph <graph.json>, --names <strict|random>, --validate, --out <file.wgsl>, --verbose";

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--graph" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --graph"));
                };
                cli.graph = Some(PathBuf::from(v));
                i += 2;
            }
            "--names" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --names"));
                };
                cli.names = Some(match v.as_str() {
                    "strict" => NamingPolicy::Strict,
                    "random" => NamingPolicy::Random,
                    other => return Err(anyhow!("invalid --names value: {other} (expected strict or random)")),
                });
                i += 2;
            }
            "--validate" => {
                cli.validate = true;
                i += 1;
            }
            "--out" | "-o" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --out"));
                };
                cli.out = Some(PathBuf::from(v));
                i += 2;
            }
            "--verbose" | "-v" => {
                cli.verbose = true;
                i += 1;
            }
            other => {
                return Err(anyhow!("unknown argument: {other} (supported: {USAGE})"));
            }
        }
    }
    Ok(cli)
}

fn log_bind_groups(module: &ResolvedModule) {
    for (index, layout) in module.used_bind_group_layouts.iter().enumerate() {
        let Some(layout) = layout else { continue };
        let catchall = module.catchall.as_ref().is_some_and(|(i, _)| *i as usize == index);
        info!(group = index, layout = %layout, catchall, "bind group");
    }
}

fn run(cli: Cli) -> Result<()> {
    let path = cli
        .graph
        .ok_or_else(|| anyhow!("missing --graph (supported: {USAGE})"))?;
    let graph = dsl::load_graph_from_path(&path)?;
    if let Some(meta) = &graph.metadata {
        info!(name = %meta.name, version = %graph.version, "loaded shader graph");
    }

    let mut options = graph.options.clone().unwrap_or_default();
    if let Some(names) = cli.names {
        options.names = names;
    }
    options.validate |= cli.validate;

    let module = dsl::resolve_graph(&graph, &options)
        .with_context(|| format!("failed to resolve shader graph {}", path.display()))?;
    log_bind_groups(&module);

    match cli.out {
        Some(out) => {
            std::fs::write(&out, &module.code)
                .with_context(|| format!("failed to write WGSL to {}", out.display()))?;
            info!(path = %out.display(), "wrote shader module");
        }
        None => println!("{}", module.code),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&args)?;

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    run(cli)
}
