use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use crate::backend::Backend;
use crate::constant::{DEFAULT_OUTPUT_NAME, PARAMETER_FILE_EXTENSION};
use crate::error::{Error, Result};
use crate::graph::Session;
use crate::manager::NDManager;
use crate::ndarray::NDList;
use crate::types::{DataType, Shape};
use super::{Block, Predictor, Translator};

/// # Model
///
/// A [`Block`], its parameters and the session its forward pass was traced
/// into.
///
/// The model owns a sub-manager: parameters, traced placeholders and every
/// predictor's manager live below it and are released by [`Model::close`].
///
/// # Example
///
/// ```ignore
/// let mut model = Model::new("linear", engine().system_manager())?;
/// model.add_input("x", Shape::new(vec![-1, 3]), DataType::Float32);
/// model.set_block(|params: &NDList<_>, inputs: &NDList<_>| {
///     Ok(NDList::from(vec![inputs[0].dot(&params[0])?]))
/// });
/// model.load("/models/linear")?;
/// let predictor = model.new_predictor(NDListTranslator)?;
/// ```
pub struct Model<B: Backend> {
    name: String,
    manager: NDManager<B>,
    block: Option<Arc<dyn Block<B>>>,
    inputs: Vec<(String, Shape, DataType)>,
    parameters: NDList<B>,
    properties: HashMap<String, String>,
    model_dir: Option<PathBuf>,
    session: Option<Arc<Session<B>>>,
    data_type: DataType,
}

impl<B: Backend> Model<B> {
    /// Creates an empty model scoped to a sub-manager of `manager`
    pub fn new(name: impl Into<String>, manager: &NDManager<B>) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            manager: manager.new_sub_manager()?,
            block: None,
            inputs: vec![],
            parameters: NDList::new(),
            properties: HashMap::new(),
            model_dir: None,
            session: None,
            data_type: DataType::Float32,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &NDManager<B> {
        &self.manager
    }

    pub fn set_block(&mut self, block: impl Block<B> + 'static) {
        self.block = Some(Arc::new(block));
    }

    pub fn block(&self) -> Option<&Arc<dyn Block<B>>> {
        self.block.as_ref()
    }

    /// Declares an input the block receives, in declaration order
    pub fn add_input(&mut self, name: impl Into<String>, shape: impl Into<Shape>, data_type: DataType) {
        self.inputs.push((name.into(), shape.into(), data_type));
    }

    pub fn describe_input(&self) -> Vec<(String, Shape)> {
        self.inputs
            .iter()
            .map(|(name, shape, _)| (name.clone(), shape.clone()))
            .collect()
    }

    /// Names and shapes of the traced outputs, empty before the model is loaded
    pub fn describe_output(&self) -> Vec<(String, Shape)> {
        let Some(session) = &self.session else {
            return vec![];
        };
        session
            .output_names()
            .into_iter()
            .filter_map(|name| session.output_shape(&name).map(|shape| (name, shape)))
            .collect()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Element type of the parameters, `Float32` until some are loaded
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn parameters(&self) -> &NDList<B> {
        &self.parameters
    }

    /// Replaces the parameters, closing the previous ones. Takes effect at the
    /// next trace.
    pub fn set_parameters(&mut self, parameters: NDList<B>) -> Result<()> {
        parameters.attach_to(&self.manager)?;
        self.parameters.close();
        self.data_type = match parameters.get(0) {
            Some(first) => first.data_type()?,
            None => DataType::Float32,
        };
        self.parameters = parameters;
        Ok(())
    }

    pub fn model_dir(&self) -> Option<&Path> {
        self.model_dir.as_deref()
    }

    pub fn session(&self) -> Option<&Arc<Session<B>>> {
        self.session.as_ref()
    }

    /// Loads parameters and traces the block.
    ///
    /// # Parameters
    ///
    /// * `path` - A directory holding `<name>.safetensors`, or the parameter file itself
    ///
    /// # Returns
    ///
    /// [`Error::Io`] when no parameter file exists, [`Error::IllegalState`] when
    /// no block is set, or any error raised while tracing
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.manager.ensure_open()?;
        let path = path.as_ref();
        let (file, dir) = if path.is_dir() {
            (self.parameter_file(path), path.to_path_buf())
        } else {
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (path.to_path_buf(), dir)
        };
        if !file.is_file() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no parameter file at {}", file.display()),
            )));
        }

        let tensors = self.manager.backend().load(&file, self.manager.device())?;
        let parameters = tensors
            .into_iter()
            .map(|(name, tensor)| {
                let array = self.manager.from_tensor(tensor)?;
                array.set_name(name);
                Ok(array)
            })
            .collect::<Result<NDList<B>>>()?;
        self.parameters.close();
        self.data_type = match parameters.get(0) {
            Some(first) => first.data_type()?,
            None => DataType::Float32,
        };
        self.parameters = parameters;
        self.model_dir = Some(dir);
        self.trace()?;
        debug!(model = %self.name, parameters = self.parameters.len(), file = %file.display(), "model loaded");
        Ok(())
    }

    /// Traces the block without loading parameters
    pub fn initialize(&mut self) -> Result<()> {
        self.manager.ensure_open()?;
        self.trace()
    }

    fn trace(&mut self) -> Result<()> {
        let block = self
            .block
            .clone()
            .ok_or_else(|| Error::IllegalState(format!("model {} has no block", self.name)))?;
        let session = self.manager.install_session()?;
        let inputs = self
            .inputs
            .iter()
            .map(|(name, shape, data_type)| self.manager.placeholder(name, shape.clone(), *data_type))
            .collect::<Result<NDList<B>>>()?;

        let outputs = block.forward(&self.parameters, &inputs)?;
        if outputs.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "block of model {} produced no outputs", self.name
            )));
        }
        let single = outputs.len() == 1;
        for (i, output) in outputs.iter().enumerate() {
            let name = output.name().unwrap_or_else(|| {
                if single {
                    DEFAULT_OUTPUT_NAME.to_string()
                } else {
                    format!("{}{}", DEFAULT_OUTPUT_NAME, i)
                }
            });
            session.declare_output(name, output)?;
        }
        debug!(model = %self.name, inputs = inputs.len(), outputs = outputs.len(), "block traced");
        self.session = Some(session);
        Ok(())
    }

    /// Writes the parameters to `<dir>/<name>.safetensors`
    ///
    /// # Returns
    ///
    /// The path written
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let tensors = self
            .parameters
            .iter()
            .enumerate()
            .map(|(i, array)| {
                let name = array.name().unwrap_or_else(|| format!("param{}", i));
                Ok((name, array.tensor()?))
            })
            .collect::<Result<Vec<_>>>()?;
        let file = self.parameter_file(dir);
        self.manager.backend().save(&tensors, &file)?;
        debug!(model = %self.name, file = %file.display(), "model saved");
        Ok(file)
    }

    /// Path of a readable file called `name` in the model directory, if any
    pub fn artifact(&self, name: &str) -> Result<Option<PathBuf>> {
        let dir = self.loaded_dir()?;
        if name.is_empty() || Path::new(name).components().any(|c| c.as_os_str() == "..") {
            return Err(Error::InvalidArgument(format!("invalid artifact name {:?}", name)));
        }
        let file = dir.join(name);
        let readable = file.is_file() && std::fs::File::open(&file).is_ok();
        Ok(readable.then_some(file))
    }

    /// Names of the files in the model directory, sorted
    pub fn artifact_names(&self) -> Result<Vec<String>> {
        let mut names = std::fs::read_dir(self.loaded_dir()?)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    /// Creates a predictor over the traced session.
    ///
    /// Fails with [`Error::IllegalState`] until [`load`](Model::load) or
    /// [`initialize`](Model::initialize) has succeeded.
    pub fn new_predictor<I, O>(&self, translator: impl Translator<B, I, O> + 'static) -> Result<Predictor<B, I, O>> {
        let session = self
            .session
            .clone()
            .ok_or_else(|| Error::IllegalState(format!("model {} is not loaded", self.name)))?;
        let manager = self.manager.new_sub_manager()?;
        Ok(Predictor::new(self.name.clone(), manager, session, Arc::new(translator)))
    }

    /// Releases parameters, placeholders and every predictor of this model
    pub fn close(&self) {
        self.manager.close();
    }

    fn parameter_file(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", self.name, PARAMETER_FILE_EXTENSION))
    }

    fn loaded_dir(&self) -> Result<&Path> {
        self.model_dir
            .as_deref()
            .ok_or_else(|| Error::IllegalState(format!("model {} is not loaded", self.name)))
    }
}
