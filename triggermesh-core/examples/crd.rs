//! A script used to generate the CRDs used by this project.
//!
//! Any time a CRD spec changes, this script can be run to ensure that the CRDs are up-to-date and
//! ready to be synced with the cluster. Pass an output directory to write one file per CRD,
//! otherwise all CRDs are printed to stdout as a multi-document YAML stream.

use anyhow::{Context, Result};
use kube::CustomResourceExt;
use triggermesh_core::crd::{MemoryBroker, RedisBroker, Replay, Trigger};

fn main() -> Result<()> {
    let crds = vec![
        ("memorybroker.yaml", MemoryBroker::crd()),
        ("redisbroker.yaml", RedisBroker::crd()),
        ("trigger.yaml", Trigger::crd()),
        ("replay.yaml", Replay::crd()),
    ];

    let out_dir = std::env::args().nth(1).map(std::path::PathBuf::from);
    for (file, crd) in crds {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let yaml = serde_yaml::to_string(&crd).with_context(|| format!("error serializing {} CRD to yaml", name))?;
        match &out_dir {
            Some(dir) => {
                let path = dir.join(file);
                std::fs::write(&path, &yaml).with_context(|| format!("error writing {} CRD to {:?}", name, path))?;
                eprintln!("{} CRD written to {:?}", name, path);
            }
            None => print!("{}", yaml),
        }
    }

    Ok(())
}
