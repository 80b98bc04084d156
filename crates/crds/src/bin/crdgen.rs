//! Prints the CRD manifests for all resources in this crate as a YAML stream.

use crds::{Controller, NodeSet};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    for crd in [NodeSet::crd(), Controller::crd()] {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
