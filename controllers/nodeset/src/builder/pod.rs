//! Worker pod for one NodeSet ordinal.

use super::merge::merge_container;
use super::resources::{SLURMD_CONTAINER, worker_resource_limits};
use crate::error::ControllerError;
use crate::labels::{REVISION_LABEL, selector_labels};
use crate::pod_state::pod_name_for;
use crds::{NodeAssignment, NodeSet};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, NodeAffinity, NodeSelector, NodeSelectorRequirement,
    NodeSelectorTerm, Pod, PodDNSConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

/// Port slurmd listens on
pub const SLURMD_PORT: i32 = 6818;
/// Port slurmctld listens on
pub const SLURMCTLD_PORT: i32 = 6817;
/// Node label used to pin pods to a node
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// `--conf` value registering the node with its CPUs, memory and extra config
fn node_conf(cpus: i64, memory_mib: i64, extra_conf: Option<&str>) -> String {
    let mut parts = Vec::new();
    if cpus > 0 {
        parts.push(format!("CPUs={}", cpus));
    }
    if memory_mib > 0 {
        parts.push(format!("RealMemory={}", memory_mib));
    }
    if let Some(extra) = extra_conf.map(str::trim).filter(|extra| !extra.is_empty()) {
        parts.push(extra.to_string());
    }
    parts.join(" ")
}

fn slurmd_container(nodeset: &NodeSet, namespace: &str) -> Result<Container, ControllerError> {
    let controller = &nodeset.spec.controller_ref;
    let conf_server = format!(
        "{}-controller.{}:{}",
        controller.name,
        controller.namespace_or(namespace),
        SLURMCTLD_PORT
    );
    let (cpus, memory_mib) = worker_resource_limits(nodeset)?;

    let mut args = vec![
        "-D".to_string(),
        "-Z".to_string(),
        "--conf-server".to_string(),
        conf_server,
    ];
    let conf = node_conf(cpus, memory_mib, nodeset.spec.extra_conf.as_deref());
    if !conf.is_empty() {
        args.push("--conf".to_string());
        args.push(conf);
    }

    Ok(Container {
        name: SLURMD_CONTAINER.to_string(),
        args: Some(args),
        ports: Some(vec![ContainerPort {
            name: Some(SLURMD_CONTAINER.to_string()),
            container_port: SLURMD_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    })
}

/// Require scheduling onto `node_name`, on top of any required node affinity
fn pin_to_node(affinity: Option<Affinity>, node_name: &str) -> Affinity {
    let requirement = NodeSelectorRequirement {
        key: HOSTNAME_LABEL.to_string(),
        operator: "In".to_string(),
        values: Some(vec![node_name.to_string()]),
    };

    let mut affinity = affinity.unwrap_or_default();
    let node_affinity = affinity.node_affinity.get_or_insert_with(NodeAffinity::default);
    let required = node_affinity
        .required_during_scheduling_ignored_during_execution
        .get_or_insert_with(NodeSelector::default);

    if required.node_selector_terms.is_empty() {
        required.node_selector_terms.push(NodeSelectorTerm::default());
    }
    // Terms are ORed, so the pin has to be added to each of them
    for term in &mut required.node_selector_terms {
        term.match_expressions
            .get_or_insert_with(Vec::new)
            .push(requirement.clone());
    }
    affinity
}

/// Build the worker pod for `ordinal` of `nodeset`.
///
/// The template's `slurmd` container (if any) and then the NodeSet's `slurmd`
/// override are merged onto the generated container, which always comes
/// first. A node assignment pins the pod to the assigned node.
pub fn new_nodeset_pod(
    nodeset: &NodeSet,
    ordinal: i32,
    revision_hash: &str,
    assignment: Option<&NodeAssignment>,
) -> Result<Pod, ControllerError> {
    let nodeset_name = nodeset.name_any();
    let namespace = nodeset.namespace().unwrap_or_default();
    let name = pod_name_for(&nodeset_name, ordinal);
    let template = &nodeset.spec.template;

    let mut labels = template.labels.clone();
    labels.extend(selector_labels(&nodeset_name));
    if !revision_hash.is_empty() {
        labels.insert(REVISION_LABEL.to_string(), revision_hash.to_string());
    }

    let mut spec = template.spec.clone();
    spec.hostname = Some(name.clone());
    spec.subdomain = Some(nodeset_name.clone());
    spec.dns_config
        .get_or_insert_with(PodDNSConfig::default)
        .searches
        .get_or_insert_with(Vec::new)
        .push(format!("{}.{}.svc.cluster.local", nodeset_name, namespace));

    let template_slurmd = spec
        .containers
        .iter()
        .position(|container| container.name == SLURMD_CONTAINER)
        .map(|index| spec.containers.remove(index))
        .unwrap_or_default();
    let slurmd = merge_container(
        &merge_container(&slurmd_container(nodeset, &namespace)?, &template_slurmd)?,
        &nodeset.spec.slurmd,
    )?;
    spec.containers.insert(0, slurmd);

    if let Some(assignment) = assignment {
        spec.affinity = Some(pin_to_node(spec.affinity.take(), &assignment.node_name));
    }

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(labels),
            annotations: (!template.annotations.is_empty()).then(|| template.annotations.clone()),
            owner_references: nodeset.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}
