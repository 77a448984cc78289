//! DSE operator command line
//!
//! Prints the `DseDatacenter` CRD, or renders the desired state of a
//! datacenter manifest without touching a cluster.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dse_operator::crd::DseDatacenter;
use dse_operator::resources::ResourceBuilder;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

/// DSE Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "dse-operator")]
#[command(about = "Desired-state constructor for DSE datacenters on Kubernetes")]
#[command(version)]
struct Args {
    /// Print CRD YAML and exit
    #[arg(long)]
    print_crd: bool,

    /// Render the resources of a DseDatacenter manifest as YAML
    #[arg(long, value_name = "FILE")]
    render: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print_crd()?;
        return Ok(());
    }

    init_logging(&args);

    let Some(path) = args.render.as_ref() else {
        bail!("nothing to do: pass --print-crd or --render <FILE>");
    };
    render(path)
}

/// Initialize logging subsystem
fn init_logging(args: &Args) {
    // Logs go to stderr so rendered YAML on stdout stays clean
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Print the CRD YAML for installation
fn print_crd() -> Result<()> {
    use kube::CustomResourceExt;

    let crd = DseDatacenter::crd();
    let yaml = serde_yaml::to_string(&crd)?;
    println!("{}", yaml);

    Ok(())
}

/// Render the desired state of a datacenter manifest
fn render(path: &Path) -> Result<()> {
    let manifest = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let dc: DseDatacenter = serde_yaml::from_str(&manifest)
        .with_context(|| format!("Failed to parse DseDatacenter from {}", path.display()))?;

    let builder = ResourceBuilder::new(&dc)?;
    let state = builder
        .build_desired_state()
        .context("Failed to build desired state")?;

    info!(
        datacenter = %dc.datacenter_name(),
        statefulsets = state.statefulsets.len(),
        "Rendered desired state"
    );

    print!("{}", state.to_yaml()?);
    Ok(())
}
