//! Workflow graph model and the request-to-graph patcher.
//!
//! The backend consumes its "API format" graph: a JSON object keyed by
//! node id, where each node names its `class_type` and an `inputs` map
//! of literal values or `[node_id, output_index]` references. The
//! patcher only overwrites literal inputs on a fixed set of nodes; the
//! topology of the template is never changed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::PredictionRequest;

/// Template graph shipped with the crate.
pub const TEXT_TO_IMAGE_TEMPLATE: &str = include_str!("../workflows/text-to-image-api.json");

/// Checkpoint loaded by every run. Callers cannot select another model.
pub const CHECKPOINT: &str = "sd_xl_base_1.0.safetensors";

/// Errors raised while parsing or patching a workflow graph.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Invalid workflow JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A binding points at a node id the template does not contain.
    #[error("Workflow missing node {0}")]
    NodeNotFound(String),

    /// A bound node has no `inputs` object to write into.
    #[error("Workflow node {0} has no inputs object")]
    InvalidInputs(String),
}

/// A parsed workflow graph, keyed by node id.
///
/// Nodes are kept as raw JSON. Only the nodes a binding writes to need
/// the `{"class_type", "inputs": {...}}` shape; everything else passes
/// through untouched. Keys are sorted so that serialization is
/// deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workflow {
    nodes: BTreeMap<String, Value>,
}

impl Workflow {
    /// Parse a graph from its JSON source text. The top level must be an
    /// object; node bodies may be anything.
    pub fn parse(source: &str) -> Result<Self, WorkflowError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Raw body of one node.
    pub fn node(&self, node_id: &str) -> Option<&Value> {
        self.nodes.get(node_id)
    }

    /// Node ids in serialization order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// `class_type` of a node, if it has a string one.
    pub fn class_type(&self, node_id: &str) -> Option<&str> {
        self.nodes.get(node_id)?.get("class_type")?.as_str()
    }

    /// Look up a single input value.
    pub fn input(&self, node_id: &str, input: &str) -> Option<&Value> {
        self.nodes.get(node_id)?.get("inputs")?.get(input)
    }

    /// Overwrite (or insert) one input of an existing node.
    pub fn set_input(&mut self, target: InputTarget, value: Value) -> Result<(), WorkflowError> {
        let node = self
            .nodes
            .get_mut(target.node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(target.node_id.to_string()))?;
        let inputs = node
            .get_mut("inputs")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| WorkflowError::InvalidInputs(target.node_id.to_string()))?;
        inputs.insert(target.input.to_string(), value);
        Ok(())
    }

    /// Serialize to compact JSON.
    pub fn to_json(&self) -> Result<String, WorkflowError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Location of a patchable input: node id plus input name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputTarget {
    pub node_id: &'static str,
    pub input: &'static str,
}

impl InputTarget {
    pub const fn new(node_id: &'static str, input: &'static str) -> Self {
        Self { node_id, input }
    }
}

/// Where each request parameter lands in a particular template.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowBindings {
    pub prompt: InputTarget,
    pub negative_prompt: InputTarget,
    pub checkpoint: InputTarget,
    pub width: InputTarget,
    pub height: InputTarget,
    pub batch_size: InputTarget,
    pub steps: InputTarget,
    pub sampler_name: InputTarget,
    pub scheduler: InputTarget,
    pub seed: InputTarget,
    pub guidance_scale: InputTarget,
}

/// Bindings for [`TEXT_TO_IMAGE_TEMPLATE`].
pub const TEXT_TO_IMAGE_BINDINGS: WorkflowBindings = WorkflowBindings {
    prompt: InputTarget::new("6", "text"),
    negative_prompt: InputTarget::new("7", "text"),
    checkpoint: InputTarget::new("4", "ckpt_name"),
    width: InputTarget::new("5", "width"),
    height: InputTarget::new("5", "height"),
    batch_size: InputTarget::new("5", "batch_size"),
    steps: InputTarget::new("3", "steps"),
    sampler_name: InputTarget::new("3", "sampler_name"),
    scheduler: InputTarget::new("3", "scheduler"),
    seed: InputTarget::new("3", "seed"),
    guidance_scale: InputTarget::new("3", "cfg"),
};

impl WorkflowBindings {
    /// Write the request parameters into `workflow`.
    ///
    /// Fails on the first binding whose node is missing.
    pub fn apply(
        &self,
        workflow: &mut Workflow,
        request: &PredictionRequest,
        seed: u64,
    ) -> Result<(), WorkflowError> {
        workflow.set_input(self.prompt, Value::from(request.prompt.as_str()))?;
        // The deployed graph feeds the positive prompt to the negative
        // encoder as well; `request.negative_prompt` is not used.
        workflow.set_input(self.negative_prompt, Value::from(request.prompt.as_str()))?;
        workflow.set_input(self.checkpoint, Value::from(CHECKPOINT))?;

        workflow.set_input(self.width, Value::from(request.width))?;
        workflow.set_input(self.height, Value::from(request.height))?;
        workflow.set_input(self.batch_size, Value::from(request.num_outputs))?;

        workflow.set_input(self.steps, Value::from(request.num_inference_steps))?;
        workflow.set_input(self.sampler_name, Value::from(request.sampler_name.as_str()))?;
        workflow.set_input(self.scheduler, Value::from(request.scheduler.as_str()))?;
        workflow.set_input(self.seed, Value::from(seed))?;
        workflow.set_input(self.guidance_scale, Value::from(request.guidance_scale))?;
        Ok(())
    }
}

/// Parse `source` and patch it for one request.
///
/// The template is parsed on every call, so no graph state is shared
/// between calls.
pub fn patch_workflow(
    source: &str,
    request: &PredictionRequest,
    seed: u64,
) -> Result<Workflow, WorkflowError> {
    let mut workflow = Workflow::parse(source)?;
    TEXT_TO_IMAGE_BINDINGS.apply(&mut workflow, request, seed)?;
    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::sampling::{Sampler, Scheduler};

    fn red_cube() -> PredictionRequest {
        PredictionRequest {
            prompt: "a red cube".to_string(),
            num_inference_steps: 17,
            width: 768,
            height: 768,
            num_outputs: 1,
            sampler_name: Sampler::Euler,
            scheduler: Scheduler::Normal,
            ..Default::default()
        }
    }

    #[test]
    fn template_parses_with_all_bound_nodes() {
        let workflow = Workflow::parse(TEXT_TO_IMAGE_TEMPLATE).unwrap();
        for id in ["3", "4", "5", "6", "7"] {
            assert!(workflow.node(id).is_some(), "template lacks node {id}");
        }
        assert_eq!(workflow.class_type("3"), Some("KSampler"));
    }

    #[test]
    fn sampler_and_latent_nodes_receive_request_values() {
        let workflow = patch_workflow(TEXT_TO_IMAGE_TEMPLATE, &red_cube(), 7).unwrap();

        assert_eq!(workflow.input("3", "steps"), Some(&json!(17)));
        assert_eq!(workflow.input("3", "sampler_name"), Some(&json!("euler")));
        assert_eq!(workflow.input("3", "scheduler"), Some(&json!("normal")));
        assert_eq!(workflow.input("3", "seed"), Some(&json!(7)));
        assert_eq!(workflow.input("3", "cfg"), Some(&json!(7.5)));

        assert_eq!(workflow.input("5", "width"), Some(&json!(768)));
        assert_eq!(workflow.input("5", "height"), Some(&json!(768)));
        assert_eq!(workflow.input("5", "batch_size"), Some(&json!(1)));
    }

    #[test]
    fn checkpoint_is_fixed() {
        let workflow = patch_workflow(TEXT_TO_IMAGE_TEMPLATE, &red_cube(), 1).unwrap();
        assert_eq!(workflow.input("4", "ckpt_name"), Some(&json!(CHECKPOINT)));
    }

    #[test]
    fn both_text_encoders_get_the_positive_prompt() {
        let request = PredictionRequest {
            negative_prompt: "blurry".to_string(),
            ..red_cube()
        };
        let workflow = patch_workflow(TEXT_TO_IMAGE_TEMPLATE, &request, 1).unwrap();
        assert_eq!(workflow.input("6", "text"), Some(&json!("a red cube")));
        assert_eq!(workflow.input("7", "text"), Some(&json!("a red cube")));
    }

    #[test]
    fn links_and_metadata_are_untouched() {
        let workflow = patch_workflow(TEXT_TO_IMAGE_TEMPLATE, &red_cube(), 1).unwrap();
        assert_eq!(workflow.input("3", "model"), Some(&json!(["4", 0])));
        assert_eq!(workflow.input("6", "clip"), Some(&json!(["4", 1])));
        assert_eq!(workflow.input("9", "images"), Some(&json!(["8", 0])));
        assert_eq!(
            workflow.node("3").and_then(|node| node.get("_meta")),
            Some(&json!({"title": "KSampler"}))
        );
        assert_eq!(workflow.node_ids().count(), 7);
    }

    #[test]
    fn patching_is_deterministic() {
        let request = red_cube();
        let first = patch_workflow(TEXT_TO_IMAGE_TEMPLATE, &request, 99).unwrap();
        let second = patch_workflow(TEXT_TO_IMAGE_TEMPLATE, &request, 99).unwrap();
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn missing_node_is_a_lookup_failure() {
        let source = r#"{
            "3": {"class_type": "KSampler", "inputs": {}},
            "4": {"class_type": "CheckpointLoaderSimple", "inputs": {}},
            "5": {"class_type": "EmptyLatentImage", "inputs": {}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {}}
        }"#;
        let err = patch_workflow(source, &red_cube(), 1).unwrap_err();
        assert_matches!(err, WorkflowError::NodeNotFound(ref id) if id == "7");
    }

    #[test]
    fn unbound_nodes_may_have_any_shape() {
        let mut graph: serde_json::Map<String, Value> =
            serde_json::from_str(TEXT_TO_IMAGE_TEMPLATE).unwrap();
        graph.insert("10".into(), json!({"class_type": "Note", "inputs": null}));
        graph.insert("11".into(), json!({"inputs": {}}));
        graph.insert("12".into(), json!("free text"));
        let source = Value::Object(graph).to_string();

        let workflow = patch_workflow(&source, &red_cube(), 3).unwrap();

        assert_eq!(workflow.input("3", "seed"), Some(&json!(3)));
        assert_eq!(workflow.node("10"), Some(&json!({"class_type": "Note", "inputs": null})));
        assert_eq!(workflow.node("11"), Some(&json!({"inputs": {}})));
        assert_eq!(workflow.node("12"), Some(&json!("free text")));
    }

    #[test]
    fn bound_node_without_inputs_object_is_rejected() {
        let source = r#"{
            "3": {"class_type": "KSampler", "inputs": {}},
            "4": {"class_type": "CheckpointLoaderSimple", "inputs": {}},
            "5": {"class_type": "EmptyLatentImage", "inputs": {}},
            "6": {"class_type": "CLIPTextEncode", "inputs": null},
            "7": {"class_type": "CLIPTextEncode", "inputs": {}}
        }"#;
        let err = patch_workflow(source, &red_cube(), 1).unwrap_err();
        assert_matches!(err, WorkflowError::InvalidInputs(ref id) if id == "6");
    }

    #[test]
    fn malformed_source_is_a_parse_error() {
        assert_matches!(
            patch_workflow("{not json", &red_cube(), 1),
            Err(WorkflowError::Parse(_))
        );
    }
}
