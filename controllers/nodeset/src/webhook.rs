//! Admission defaulting for NodeSets.

use crds::NodeSet;

/// Fill in defaults: an unset replica count becomes 0
pub fn default_nodeset(nodeset: &mut NodeSet) {
    if nodeset.spec.replicas.is_none() {
        nodeset.spec.replicas = Some(0);
    }
}
