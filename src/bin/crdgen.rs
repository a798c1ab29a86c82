//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions of the operator as YAML.
//!
//! ```bash
//! # Every CRD
//! cargo run --bin crdgen > config/crd/crds.yaml
//!
//! # Only GameStatefulSet, applied directly
//! cargo run --bin crdgen -- --resource game-stateful-set | kubectl apply -f -
//! ```

use clap::{Parser, ValueEnum};
use game_statefulset_operator::crd::{GameStatefulSet, HookRun, HookTemplate};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::CustomResourceExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Resource {
    All,
    GameStatefulSet,
    HookRun,
    HookTemplate,
}

#[derive(Debug, Parser)]
#[command(name = "crdgen", about = "Generate CRD YAML for the GameStatefulSet operator")]
struct Cli {
    /// Which CRD to print
    #[arg(long, value_enum, default_value_t = Resource::All)]
    resource: Resource,
}

fn crds(resource: Resource) -> Vec<CustomResourceDefinition> {
    match resource {
        Resource::All => vec![GameStatefulSet::crd(), HookRun::crd(), HookTemplate::crd()],
        Resource::GameStatefulSet => vec![GameStatefulSet::crd()],
        Resource::HookRun => vec![HookRun::crd()],
        Resource::HookTemplate => vec![HookTemplate::crd()],
    }
}

fn main() {
    let cli = Cli::parse();

    println!("# This file is auto-generated by crdgen");
    println!("# DO NOT EDIT THIS FILE MANUALLY");
    println!("# Fix schema issues in the Rust types under src/crd/");
    println!("#");
    for crd in crds(cli.resource) {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
