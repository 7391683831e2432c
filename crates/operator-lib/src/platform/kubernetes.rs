//! Kubernetes platform
//!
//! The workload runs as pod `<app>-0` of StatefulSet `<app>`. Containers are
//! written with server-side apply, one field manager per container, so a mount
//! or variable dropped from a spec is dropped from the pod template. Readiness comes
//! from the pod's container statuses plus a `test -w` exec per mount, and files
//! are pushed by streaming them into `cat` over exec.

use super::Platform;
use crate::error::{OperatorError, Result};
use crate::models::{
    ContainerName, ContainerProbe, ContainerSpec, Mount, MountHandle, VolumeSpec, WorkloadFile,
};
use crate::storage::StorageBackend;
use crate::workload::{NetworkPlan, MULTUS_ANNOTATION};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, ResourceRequirements, Service,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, AttachParams, DeleteParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const RESTARTED_AT_ANNOTATION: &str = "upf-operator/restarted-at";
const FIELD_MANAGER: &str = "upf-operator";
const APP_LABEL: &str = "app.kubernetes.io/name";

fn map_kube_error(operation: impl Into<String>, err: kube::Error) -> OperatorError {
    let retryable = match &err {
        kube::Error::Api(response) => !matches!(response.code, 400 | 403 | 422),
        _ => true,
    };
    OperatorError::platform(operation, err, retryable)
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

fn network_attachment_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("k8s.cni.cncf.io", "v1", "NetworkAttachmentDefinition");
    ApiResource::from_gvk_with_plural(&gvk, "network-attachment-definitions")
}

fn container_manifest(spec: &ContainerSpec) -> serde_json::Value {
    let env: Vec<_> = spec
        .environment
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    let mounts: Vec<_> = spec
        .mounts
        .iter()
        .map(|m| json!({ "name": m.volume.as_str(), "mountPath": m.path }))
        .collect();

    json!({
        "name": spec.name.as_str(),
        "image": spec.image.to_string(),
        "command": ["/bin/sh", "-c", spec.command],
        "env": env,
        "volumeMounts": mounts,
        "securityContext": {
            "privileged": spec.security.privileged,
            "capabilities": { "add": spec.security.add_capabilities },
        },
    })
}

fn volumes_manifest<'a>(mounts: impl Iterator<Item = &'a Mount>) -> Vec<serde_json::Value> {
    let mut claims = BTreeMap::new();
    for mount in mounts {
        claims.insert(mount.volume.as_str(), mount.backing_id.clone());
    }
    claims
        .into_iter()
        .map(|(name, claim)| json!({ "name": name, "persistentVolumeClaim": { "claimName": claim } }))
        .collect()
}

/// Field manager owning one container and the volumes it mounts
fn container_field_manager(container: ContainerName) -> String {
    format!("{}-{}", FIELD_MANAGER, container)
}

/// Apply configuration for one container of the pod template
fn container_apply_manifest(app_name: &str, spec: &ContainerSpec) -> serde_json::Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": { "name": app_name },
        "spec": { "template": { "spec": {
            "containers": [container_manifest(spec)],
            "volumes": volumes_manifest(spec.mounts.iter()),
        }}}
    })
}

/// Platform backed by a Kubernetes StatefulSet
pub struct KubePlatform {
    client: Client,
    namespace: String,
    app_name: String,
}

impl KubePlatform {
    pub fn new(client: Client, namespace: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            app_name: app_name.into(),
        }
    }

    /// Connect using in-cluster or kubeconfig credentials
    pub async fn try_default(
        namespace: impl Into<String>,
        app_name: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace, app_name))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn pod_name(&self) -> String {
        format!("{}-0", self.app_name)
    }

    fn statefulsets(&self) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn patch_template(&self, operation: &str, patch: serde_json::Value) -> Result<()> {
        self.statefulsets()
            .patch(&self.app_name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(operation, e))
    }

    /// Run a command in a container, optionally feeding stdin; returns whether it succeeded
    async fn run(
        &self,
        container: ContainerName,
        command: Vec<String>,
        input: Option<&[u8]>,
    ) -> Result<bool> {
        let operation = format!("exec in {}", container);
        let params = AttachParams::default()
            .container(container.as_str())
            .stdin(input.is_some())
            .stderr(false);

        let mut attached = self
            .pods()
            .exec(&self.pod_name(), command, &params)
            .await
            .map_err(|e| map_kube_error(operation.as_str(), e))?;

        if let Some(bytes) = input {
            if let Some(mut stdin) = attached.stdin() {
                stdin
                    .write_all(bytes)
                    .await
                    .map_err(|e| OperatorError::platform(operation.as_str(), e, true))?;
                stdin
                    .shutdown()
                    .await
                    .map_err(|e| OperatorError::platform(operation.as_str(), e, true))?;
            }
        }

        if let Some(mut stdout) = attached.stdout() {
            let mut output = Vec::new();
            stdout
                .read_to_end(&mut output)
                .await
                .map_err(|e| OperatorError::platform(operation.as_str(), e, true))?;
            debug!(container = %container, bytes = output.len(), "Command output");
        }

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| OperatorError::platform(operation.as_str(), e, true))?;

        Ok(status.and_then(|s| s.status).as_deref() == Some("Success"))
    }
}

#[async_trait]
impl Platform for KubePlatform {
    async fn apply_container(&self, spec: &ContainerSpec) -> Result<()> {
        let manifest = container_apply_manifest(&self.app_name, spec);
        let params = PatchParams::apply(&container_field_manager(spec.name)).force();

        match self
            .statefulsets()
            .patch(&self.app_name, &params, &Patch::Apply(&manifest))
            .await
        {
            Ok(_) => {
                debug!(container = %spec.name, image = %spec.image, "Applied container");
                Ok(())
            }
            Err(kube::Error::Api(response)) if matches!(response.code, 400 | 422) => {
                Err(OperatorError::ContainerApply {
                    container: spec.name,
                    reason: response.message,
                })
            }
            Err(e) => Err(map_kube_error(format!("apply {}", spec.name), e)),
        }
    }

    async fn restart_workload(&self, specs: &[ContainerSpec]) -> Result<()> {
        for spec in specs {
            self.apply_container(spec).await?;
        }

        let mut annotations = serde_json::Map::new();
        annotations.insert(
            RESTARTED_AT_ANNOTATION.to_string(),
            json!(chrono::Utc::now().to_rfc3339()),
        );
        let patch = json!({
            "spec": { "template": { "metadata": { "annotations": annotations } } }
        });

        self.patch_template("restart workload", patch).await?;
        info!(statefulset = %self.app_name, "Rolled pod for mount topology change");
        Ok(())
    }

    async fn probe(&self, spec: &ContainerSpec) -> Result<ContainerProbe> {
        let pod = self
            .pods()
            .get_opt(&self.pod_name())
            .await
            .map_err(|e| map_kube_error(format!("probe {}", spec.name), e))?;

        let ready = pod
            .as_ref()
            .and_then(|p| p.status.as_ref())
            .and_then(|s| s.container_statuses.as_ref())
            .and_then(|statuses| statuses.iter().find(|c| c.name == spec.name.as_str()))
            .map(|c| c.ready)
            .unwrap_or(false);

        if !ready {
            return Ok(ContainerProbe::default());
        }

        let mut writable_mounts = Vec::new();
        for mount in &spec.mounts {
            let command = vec!["test".to_string(), "-w".to_string(), mount.path.clone()];
            if self.run(spec.name, command, None).await? {
                writable_mounts.push(mount.path.clone());
            }
        }

        Ok(ContainerProbe {
            running: true,
            writable_mounts,
        })
    }

    async fn push_file(&self, container: ContainerName, file: &WorkloadFile) -> Result<()> {
        let directory = file
            .path
            .rsplit_once('/')
            .map(|(dir, _)| if dir.is_empty() { "/" } else { dir })
            .unwrap_or("/");
        let script = format!(
            "mkdir -p {dir} && cat > {path} && chmod {mode:o} {path}",
            dir = directory,
            path = file.path,
            mode = file.permissions
        );
        let command = vec!["/bin/sh".to_string(), "-c".to_string(), script];

        if self
            .run(container, command, Some(file.contents.as_bytes()))
            .await?
        {
            info!(container = %container, path = %file.path, "Pushed file");
            Ok(())
        } else {
            Err(OperatorError::platform(
                format!("push {}", file.path),
                "write command failed",
                true,
            ))
        }
    }

    async fn exec(
        &self,
        container: ContainerName,
        command: &[String],
        environment: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut argv = vec!["env".to_string()];
        argv.extend(environment.iter().map(|(k, v)| format!("{}={}", k, v)));
        argv.extend(command.iter().cloned());

        if self.run(container, argv, None).await? {
            Ok(())
        } else {
            Err(OperatorError::platform(
                format!("exec in {}", container),
                format!("{} exited unsuccessfully", command.join(" ")),
                true,
            ))
        }
    }

    async fn ensure_network(&self, plan: &NetworkPlan) -> Result<()> {
        let resource = network_attachment_resource();
        let definitions: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &self.namespace, &resource);

        for attachment in &plan.attachments {
            let existing = definitions
                .get_opt(&attachment.name)
                .await
                .map_err(|e| map_kube_error(format!("get {}", attachment.name), e))?;
            let data = json!({ "spec": { "config": attachment.cni_config() } });
            if let Some(existing) = existing {
                if existing.data.get("spec") != data.get("spec") {
                    definitions
                        .patch(&attachment.name, &PatchParams::default(), &Patch::Merge(&data))
                        .await
                        .map_err(|e| map_kube_error(format!("update {}", attachment.name), e))?;
                    info!(name = %attachment.name, "NetworkAttachmentDefinition updated");
                }
                continue;
            }

            let object = DynamicObject::new(&attachment.name, &resource).data(data);
            definitions
                .create(&PostParams::default(), &object)
                .await
                .map_err(|e| map_kube_error(format!("create {}", attachment.name), e))?;
            info!(name = %attachment.name, "NetworkAttachmentDefinition created");
        }

        let mut annotations = serde_json::Map::new();
        annotations.insert(MULTUS_ANNOTATION.to_string(), json!(plan.multus_annotation()));
        let annotation_patch = json!({
            "spec": { "template": { "metadata": { "annotations": annotations } } }
        });
        self.statefulsets()
            .patch(&self.app_name, &PatchParams::default(), &Patch::Merge(&annotation_patch))
            .await
            .map_err(|e| map_kube_error("annotate statefulset", e))?;

        let ports: Vec<_> = plan
            .service_ports
            .iter()
            .map(|p| json!({ "name": p.name, "port": p.port, "targetPort": p.port, "protocol": p.protocol }))
            .collect();
        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        services
            .patch(
                &self.app_name,
                &PatchParams::default(),
                &Patch::Merge(&json!({ "spec": { "ports": ports } })),
            )
            .await
            .map_err(|e| map_kube_error("patch service ports", e))?;

        Ok(())
    }

    async fn remove_network(&self, plan: &NetworkPlan) -> Result<()> {
        let resource = network_attachment_resource();
        let definitions: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &self.namespace, &resource);

        for attachment in &plan.attachments {
            match definitions
                .delete(&attachment.name, &DeleteParams::default())
                .await
            {
                Ok(_) => info!(name = %attachment.name, "NetworkAttachmentDefinition deleted"),
                Err(e) if is_not_found(&e) => {
                    debug!(name = %attachment.name, "NetworkAttachmentDefinition already absent")
                }
                Err(e) => return Err(map_kube_error(format!("delete {}", attachment.name), e)),
            }
        }
        Ok(())
    }
}

/// Storage backend using PersistentVolumeClaims named like StatefulSet claims
pub struct KubeStorage {
    client: Client,
    namespace: String,
    app_name: String,
    storage_class: Option<String>,
}

impl KubeStorage {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        app_name: impl Into<String>,
        storage_class: Option<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            app_name: app_name.into(),
            storage_class,
        }
    }

    fn claim_name(&self, spec: &VolumeSpec) -> String {
        format!("{}-{}-0", spec.name, self.app_name)
    }

    fn claims(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn storage_error(spec: &VolumeSpec, reason: impl ToString) -> OperatorError {
        OperatorError::StorageProvision {
            volume: spec.name,
            reason: reason.to_string(),
        }
    }
}

/// Capacity of a claim: bound capacity if known, otherwise the requested size
fn claim_capacity(claim: &PersistentVolumeClaim) -> Option<u64> {
    let bound = claim
        .status
        .as_ref()
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get("storage"));
    let requested = claim
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"));

    bound.or(requested).and_then(|q| parse_quantity(&q.0))
}

#[async_trait]
impl StorageBackend for KubeStorage {
    async fn lookup(&self, spec: &VolumeSpec) -> Result<Option<MountHandle>> {
        let name = self.claim_name(spec);
        let claim = self
            .claims()
            .get_opt(&name)
            .await
            .map_err(|e| Self::storage_error(spec, e))?;

        let Some(claim) = claim else {
            return Ok(None);
        };

        let phase = claim
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_default();
        if phase == "Lost" {
            return Err(Self::storage_error(
                spec,
                format!("claim {} lost its volume", name),
            ));
        }

        let capacity_bytes = claim_capacity(&claim).ok_or_else(|| {
            Self::storage_error(spec, format!("claim {} has no storage size", name))
        })?;

        Ok(Some(MountHandle {
            volume: spec.name,
            backing_id: name,
            capacity_bytes,
        }))
    }

    async fn provision(&self, spec: &VolumeSpec) -> Result<MountHandle> {
        let name = self.claim_name(spec);
        let mut requests = BTreeMap::new();
        requests.insert(
            "storage".to_string(),
            Quantity(spec.minimum_size_bytes.to_string()),
        );
        let mut labels = BTreeMap::new();
        labels.insert(APP_LABEL.to_string(), self.app_name.clone());

        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: self.storage_class.clone(),
                volume_mode: Some("Filesystem".to_string()),
                resources: Some(ResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.claims()
            .create(&PostParams::default(), &claim)
            .await
            .map_err(|e| Self::storage_error(spec, e))?;
        info!(claim = %name, bytes = spec.minimum_size_bytes, "PersistentVolumeClaim created");

        Ok(MountHandle {
            volume: spec.name,
            backing_id: name,
            capacity_bytes: spec.minimum_size_bytes,
        })
    }
}

/// Parse a Kubernetes quantity such as `1Gi`, `500M` or `1048576` into bytes
pub fn parse_quantity(quantity: &str) -> Option<u64> {
    const SUFFIXES: [(&str, f64); 12] = [
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let quantity = quantity.trim();
    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| quantity.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((quantity, 1.0));

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).ceil() as u64)
}
