use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};
use uuid::Uuid;
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::ndarray::{NDArray, NDList};
use crate::sync::{read, write};
use crate::types::{DataType, Shape};
use super::{evaluate, NodeId, SharedGraph};

/// # Session
///
/// Evaluates nodes of the shared graph against a signature of named inputs and
/// named outputs.
///
/// Inputs are placeholder nodes created through
/// [`NDManager::placeholder`](crate::NDManager::placeholder); outputs are any
/// arrays declared with [`Session::declare_output`]. Managers find their session
/// by walking up to the nearest ancestor that installed one.
///
/// A session holds no values between calls: every [`evaluate`](Session::evaluate)
/// recomputes from the bound inputs.
#[derive(Debug)]
pub struct Session<B: Backend> {
    uid: String,
    backend: Arc<B>,
    graph: SharedGraph<B::Tensor>,
    inputs: RwLock<Vec<(String, NodeId)>>,
    outputs: RwLock<Vec<(String, NodeId)>>,
}

impl<B: Backend> Session<B> {
    pub(crate) fn new(backend: Arc<B>, graph: SharedGraph<B::Tensor>) -> Self {
        let uid = Uuid::new_v4().to_string();
        debug!(session = %uid, "session created");
        Self {
            uid,
            backend,
            graph,
            inputs: RwLock::new(vec![]),
            outputs: RwLock::new(vec![]),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub(crate) fn declare_input(&self, name: &str, node: NodeId) -> Result<()> {
        let mut inputs = write(&self.inputs);
        if inputs.iter().any(|(existing, _)| existing == name) {
            return Err(Error::InvalidArgument(format!(
                "session already declares an input named {}", name
            )));
        }
        inputs.push((name.to_string(), node));
        Ok(())
    }

    /// Declares `array` as the output called `name`.
    ///
    /// Outputs are evaluated by [`run`](Session::run) in the order they were declared.
    pub fn declare_output(&self, name: impl Into<String>, array: &NDArray<B>) -> Result<()> {
        let name = name.into();
        let node = array.node_id()?;
        let mut outputs = write(&self.outputs);
        if outputs.iter().any(|(existing, _)| *existing == name) {
            return Err(Error::InvalidArgument(format!(
                "session already declares an output named {}", name
            )));
        }
        trace!(session = %self.uid, output = %name, "output declared");
        outputs.push((name, node));
        Ok(())
    }

    pub fn input_names(&self) -> Vec<String> {
        read(&self.inputs).iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        read(&self.outputs).iter().map(|(name, _)| name.clone()).collect()
    }

    /// Declared shape of an input, `-1` marking dimensions fixed only at bind time
    pub fn input_shape(&self, name: &str) -> Option<Shape> {
        self.describe(&self.inputs, name).map(|(shape, _)| shape)
    }

    pub fn output_shape(&self, name: &str) -> Option<Shape> {
        self.describe(&self.outputs, name).map(|(shape, _)| shape)
    }

    pub fn output_data_type(&self, name: &str) -> Option<DataType> {
        self.describe(&self.outputs, name).map(|(_, dtype)| dtype)
    }

    fn describe(&self, table: &RwLock<Vec<(String, NodeId)>>, name: &str) -> Option<(Shape, DataType)> {
        let node = lookup(&read(table), name)?;
        let graph = read(&self.graph);
        graph.node(node).ok().map(|node| (node.shape.clone(), node.data_type))
    }

    /// Evaluates the named outputs in one pass.
    ///
    /// # Parameters
    ///
    /// * `inputs` - Values for declared inputs, keyed by input name
    /// * `outputs` - Names of declared outputs to compute
    ///
    /// # Returns
    ///
    /// The requested values keyed by output name, or
    /// * [`Error::InvalidArgument`] for an undeclared input or a repeated output name
    /// * [`Error::ShapeMismatch`] when a value contradicts its input's declared shape
    /// * [`Error::UnresolvedDependency`] for an undeclared output, or one that
    ///   needs an input that was not supplied
    pub fn evaluate(
        &self,
        inputs: HashMap<String, B::Tensor>,
        outputs: &[&str],
    ) -> Result<HashMap<String, B::Tensor>> {
        let bindings = self.bind(inputs)?;

        let mut seen = HashSet::new();
        let targets = {
            let declared = read(&self.outputs);
            outputs
                .iter()
                .map(|&name| {
                    if !seen.insert(name) {
                        return Err(Error::InvalidArgument(format!(
                            "output {} requested more than once", name
                        )));
                    }
                    lookup(&declared, name).ok_or_else(|| {
                        Error::UnresolvedDependency(format!("session has no output named {}", name))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let values = evaluate(self.backend.as_ref(), &self.graph, bindings, &targets)?;
        Ok(outputs
            .iter()
            .map(|name| name.to_string())
            .zip(values)
            .collect())
    }

    /// Binds every array of `inputs` by name and evaluates all declared outputs.
    ///
    /// # Returns
    ///
    /// `(name, value)` pairs in declaration order
    pub fn run(&self, inputs: &NDList<B>) -> Result<Vec<(String, B::Tensor)>> {
        let mut bound = HashMap::with_capacity(inputs.len());
        for array in inputs {
            let name = array.name().ok_or_else(|| {
                Error::InvalidArgument("session inputs must be named".to_string())
            })?;
            bound.insert(name, array.tensor()?);
        }

        let names = self.output_names();
        if names.is_empty() {
            return Err(Error::UnresolvedDependency(format!(
                "session {} declares no outputs", self.uid
            )));
        }
        let requested = names.iter().map(String::as_str).collect::<Vec<_>>();
        let mut values = self.evaluate(bound, &requested)?;
        names
            .into_iter()
            .map(|name| {
                let value = values.remove(&name).ok_or_else(|| {
                    Error::UnresolvedDependency(format!("output {} was not computed", name))
                })?;
                Ok((name, value))
            })
            .collect()
    }

    fn bind(&self, inputs: HashMap<String, B::Tensor>) -> Result<HashMap<NodeId, B::Tensor>> {
        let declared = read(&self.inputs);
        let graph = read(&self.graph);
        inputs
            .into_iter()
            .map(|(name, value)| {
                let node = lookup(&declared, &name).ok_or_else(|| {
                    Error::InvalidArgument(format!("session has no input named {}", name))
                })?;
                let placeholder = graph.node(node)?;
                let actual = B::shape(&value);
                if !placeholder.shape.accepts(&actual) {
                    return Err(Error::shape_mismatch(format!("bind {}", name), &placeholder.shape, &actual));
                }
                let data_type = B::data_type(&value)?;
                if data_type != placeholder.data_type {
                    return Err(Error::InvalidArgument(format!(
                        "input {} expects {}, got {}", name, placeholder.data_type, data_type
                    )));
                }
                Ok((node, value))
            })
            .collect()
    }
}

fn lookup(table: &[(String, NodeId)], name: &str) -> Option<NodeId> {
    table
        .iter()
        .find(|(existing, _)| existing == name)
        .map(|(_, node)| *node)
}

#[cfg(all(test, feature = "candle"))]
mod tests {
    use super::*;
    use candle_core::{Device as CandleDevice, Tensor};
    use crate::backend::candle::CandleBackend;
    use crate::engine::{Engine, EngineOptions};

    fn values(tensor: &Tensor) -> Vec<f32> {
        tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    fn softmax_session(engine: &Engine<CandleBackend>) -> Arc<Session<CandleBackend>> {
        let manager = engine.new_base_manager().unwrap();
        let session = manager.install_session().unwrap();
        let x = manager.placeholder("x", Shape::new(vec![1, -1]), DataType::Float32).unwrap();
        session.declare_output("probabilities", &x.softmax(-1, 1.0).unwrap()).unwrap();
        session.declare_output("doubled", &x.mul(2.0).unwrap()).unwrap();
        session
    }

    fn row(data: &[f32]) -> Tensor {
        Tensor::new(data, &CandleDevice::Cpu).unwrap().reshape((1, data.len())).unwrap()
    }

    #[test]
    fn test_evaluate_softmax() {
        let engine = Engine::new(CandleBackend, EngineOptions::default());
        let session = softmax_session(&engine);

        let inputs = HashMap::from([("x".to_string(), row(&[1.0, 2.0, 3.0]))]);
        let outputs = session.evaluate(inputs, &["probabilities"]).unwrap();
        let probabilities = &outputs["probabilities"];
        assert_eq!(probabilities.dims(), &[1, 3]);
        let probabilities = values(probabilities);
        assert!((probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(probabilities[0] < probabilities[1] && probabilities[1] < probabilities[2]);
    }

    #[test]
    fn test_signature() {
        let engine = Engine::new(CandleBackend, EngineOptions::default());
        let session = softmax_session(&engine);
        assert_eq!(session.input_names(), vec!["x".to_string()]);
        assert_eq!(session.output_names(), vec!["probabilities".to_string(), "doubled".to_string()]);
        assert_eq!(session.input_shape("x"), Some(Shape::new(vec![1, -1])));
        assert_eq!(session.output_data_type("doubled"), Some(DataType::Float32));
        assert_eq!(session.output_shape("missing"), None);
    }

    #[test]
    fn test_evaluate_errors() {
        let engine = Engine::new(CandleBackend, EngineOptions::default());
        let session = softmax_session(&engine);

        let missing = session.evaluate(HashMap::new(), &["doubled"]);
        assert!(matches!(missing, Err(Error::UnresolvedDependency(_))));

        let unknown_input = HashMap::from([("y".to_string(), row(&[1.0]))]);
        assert!(matches!(session.evaluate(unknown_input, &["doubled"]), Err(Error::InvalidArgument(_))));

        let wrong_rank = Tensor::new(&[1.0f32, 2.0], &CandleDevice::Cpu).unwrap();
        let wrong_rank = HashMap::from([("x".to_string(), wrong_rank)]);
        assert!(matches!(session.evaluate(wrong_rank, &["doubled"]), Err(Error::ShapeMismatch { .. })));

        let inputs = || HashMap::from([("x".to_string(), row(&[1.0]))]);
        assert!(matches!(session.evaluate(inputs(), &["nope"]), Err(Error::UnresolvedDependency(_))));
        assert!(matches!(
            session.evaluate(inputs(), &["doubled", "doubled"]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_bind_checks_data_type() {
        let engine = Engine::new(CandleBackend, EngineOptions::default());
        let manager = engine.new_base_manager().unwrap();
        let session = manager.install_session().unwrap();
        let x = manager.placeholder("x", Shape::new(vec![-1]), DataType::Float32).unwrap();
        let w = manager.create(&[1.0f32, 2.0], [2]).unwrap();
        session.declare_output("y", &x.add(&w).unwrap()).unwrap();

        let wide = Tensor::new(&[1.0f64, 2.0], &CandleDevice::Cpu).unwrap();
        let inputs = HashMap::from([("x".to_string(), wide)]);
        assert!(matches!(session.evaluate(inputs, &["y"]), Err(Error::InvalidArgument(_))));

        let narrow = Tensor::new(&[1.0f32, 2.0], &CandleDevice::Cpu).unwrap();
        let outputs = session.evaluate(HashMap::from([("x".to_string(), narrow)]), &["y"]).unwrap();
        assert_eq!(values(&outputs["y"]), vec![2.0, 4.0]);
    }

    #[test]
    fn test_declarations_are_unique() {
        let engine = Engine::new(CandleBackend, EngineOptions::default());
        let manager = engine.new_base_manager().unwrap();
        let session = manager.install_session().unwrap();
        let x = manager.placeholder("x", Shape::new(vec![2]), DataType::Float32).unwrap();
        assert!(manager.placeholder("x", Shape::new(vec![2]), DataType::Float32).is_err());
        session.declare_output("y", &x).unwrap();
        assert!(matches!(session.declare_output("y", &x), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_run_in_declaration_order() {
        let engine = Engine::new(CandleBackend, EngineOptions::default());
        let session = softmax_session(&engine);
        let manager = engine.new_base_manager().unwrap();

        let x = manager.create(&[0.0f32, 0.0], [1, 2]).unwrap();
        assert!(matches!(session.run(&NDList::from(vec![x.clone()])), Err(Error::InvalidArgument(_))));

        x.set_name("x");
        let outputs = session.run(&NDList::from(vec![x])).unwrap();
        let names = outputs.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["probabilities", "doubled"]);
        assert_eq!(values(&outputs[0].1), vec![0.5, 0.5]);
        assert_eq!(values(&outputs[1].1), vec![0.0, 0.0]);
    }

    #[test]
    fn test_run_without_outputs() {
        let engine = Engine::new(CandleBackend, EngineOptions::default());
        let manager = engine.new_base_manager().unwrap();
        let session = manager.install_session().unwrap();
        assert!(matches!(session.run(&NDList::new()), Err(Error::UnresolvedDependency(_))));
    }
}
