//! Engine API wire shapes and their mapping onto the core domain types.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use updater_core::{ClientError, Service, ServiceId, UpdateSpec, VersionToken};

const IMAGE_POINTER: &str = "/TaskTemplate/ContainerSpec/Image";
const REPLICAS_POINTER: &str = "/Mode/Replicated/Replicas";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ApiService {
    #[serde(rename = "ID")]
    pub id: String,
    pub version: ApiVersion,
    pub spec: Value,
    #[serde(default)]
    pub previous_spec: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiVersion {
    #[serde(rename = "Index")]
    pub index: u64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiUpdateResponse {
    #[serde(rename = "Warnings", default)]
    pub warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DistributionInspect {
    #[serde(rename = "Descriptor")]
    pub descriptor: Descriptor,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Descriptor {
    pub digest: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub message: String,
}

impl ApiService {
    pub fn into_service(self) -> Result<Service, ClientError> {
        let image = self
            .spec
            .pointer(IMAGE_POINTER)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ClientError::decode(format!("service {} has no container image", self.id))
            })?
            .to_string();
        let name = self
            .spec
            .get("Name")
            .and_then(Value::as_str)
            .unwrap_or(&self.id)
            .to_string();
        let labels = self
            .spec
            .get("Labels")
            .and_then(Value::as_object)
            .map(string_map)
            .unwrap_or_default();
        let replicas = self.spec.pointer(REPLICAS_POINTER).and_then(Value::as_u64);
        let previous_image = self
            .previous_spec
            .as_ref()
            .and_then(|spec| spec.pointer(IMAGE_POINTER))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Service {
            id: ServiceId(self.id),
            name,
            labels,
            image,
            version: VersionToken(self.version.index),
            replicas,
            previous_image,
            definition: self.spec,
        })
    }
}

fn string_map(object: &Map<String, Value>) -> BTreeMap<String, String> {
    object
        .iter()
        .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
        .collect()
}

/// The service definition to submit: the original spec with the new image
/// and, when requested, the replica count patched in.
pub(crate) fn render_spec(spec: &UpdateSpec) -> Value {
    let mut definition = spec.definition.clone();
    set_path(
        &mut definition,
        &["TaskTemplate", "ContainerSpec", "Image"],
        Value::String(spec.image.clone()),
    );
    if let Some(replicas) = spec.replicas {
        // Global services have no replica count to patch.
        if definition.pointer(REPLICAS_POINTER).is_some() {
            set_path(
                &mut definition,
                &["Mode", "Replicated", "Replicas"],
                Value::from(replicas),
            );
        }
    }
    definition
}

fn set_path(root: &mut Value, path: &[&str], value: Value) {
    let mut node = root;
    for key in &path[..path.len() - 1] {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let (Value::Object(map), Some(last)) = (node, path.last()) {
        map.insert(last.to_string(), value);
    }
}
