//! Render command

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use tracing::info;

use lattice_common::LABEL_NAME;
use lattice_network::{BootstrapFacts, RenderedNetwork};

use super::format::print_table;
use super::validate::report_failure;
use super::{load_yaml, InputArgs};
use crate::Result;

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    /// Bootstrap facts snapshot (YAML or JSON); omitted facts render degraded
    #[arg(long)]
    pub facts: Option<PathBuf>,

    /// Write manifests to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Manifest output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub format: OutputFormat,

    /// Print a per-provider summary instead of manifests
    #[arg(long)]
    pub summary: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Multi-document YAML stream
    Yaml,
    /// JSON array
    Json,
}

pub fn run(args: RenderArgs) -> Result<()> {
    let reconciler = args.inputs.reconciler()?;
    let spec = args.inputs.spec()?;
    let previous = args.inputs.previous()?;
    let facts: BootstrapFacts = match &args.facts {
        Some(path) => load_yaml(path)?,
        None => BootstrapFacts::default(),
    };

    let rendered = match reconciler.reconcile(&spec, previous.as_ref(), &facts) {
        Ok(rendered) => rendered,
        Err(err) => return Err(report_failure(err, &reconciler.registry().release().version)),
    };

    for warning in &rendered.warnings {
        eprintln!("warning: {}", warning);
    }

    if args.summary {
        let (headers, rows) = summary_rows(&rendered);
        print_table(&headers, &rows);
        return Ok(());
    }

    let out = serialize(&rendered, args.format)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, out)?;
            info!(path = %path.display(), objects = rendered.objects.len(), "manifests written");
        }
        None => print!("{}", out),
    }
    Ok(())
}

fn serialize(rendered: &RenderedNetwork, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Yaml => rendered.to_yaml()?,
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(&rendered.objects)?;
            json.push('\n');
            json
        }
    })
}

fn summary_rows(rendered: &RenderedNetwork) -> ([&'static str; 3], Vec<Vec<String>>) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for object in &rendered.objects {
        let component = object
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(LABEL_NAME))
            .map_or("", String::as_str);
        *counts.entry(component).or_default() += 1;
    }

    let rows = rendered
        .config_hashes
        .iter()
        .map(|(provider, hash)| {
            vec![
                provider.clone(),
                counts.get(provider.as_str()).copied().unwrap_or(0).to_string(),
                hash.clone(),
            ]
        })
        .collect();
    (["PROVIDER", "OBJECTS", "CONFIG HASH"], rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_common::crd::NetworkSpec;
    use lattice_common::ReleaseConfig;
    use lattice_network::NetworkReconciler;

    fn third_party() -> RenderedNetwork {
        let spec: NetworkSpec = serde_json::from_value(serde_json::json!({
            "serviceNetwork": ["172.30.0.0/16"],
            "clusterNetwork": [{ "cidr": "10.128.0.0/14", "hostPrefix": 23 }],
            "defaultNetwork": { "type": "ThirdParty" }
        }))
        .unwrap();
        NetworkReconciler::new(ReleaseConfig::default())
            .reconcile(&spec, None, &BootstrapFacts::default())
            .unwrap()
    }

    #[test]
    fn summary_counts_objects_per_provider() {
        let rendered = third_party();
        let (_, rows) = summary_rows(&rendered);
        let providers: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(providers, vec!["kube-proxy", "multus", "node-identity"]);
        for row in &rows {
            assert_ne!(row[1], "0", "{} rendered nothing", row[0]);
            assert_eq!(row[2].len(), 64);
        }
    }

    #[test]
    fn json_output_is_an_array_of_objects() {
        let rendered = third_party();
        let json = serialize(&rendered, OutputFormat::Json).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), rendered.objects.len());
        assert_eq!(parsed[0]["kind"], "Namespace");
    }
}
