//! Model loading and execution.
//!
//! A `ModelHandle` only hands out two things: the input shape and `execute`. Everything the
//! engine needs from a network goes through the `Network` trait, the ONNX implementation is
//! `TractNetwork`.
use std::{
    fs::File,
    io::{Cursor, Read},
    path::Path,
    sync::Arc,
};

use ndarray::{Array4, ArrayD};
use tract_onnx::prelude::*;

use crate::error::DetectError;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

const READ_CHUNK: usize = 64 * 1024;

/// Model input shape, `[batch, width, height, channels]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub batch: usize,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl InputShape {
    pub fn as_array(&self) -> [usize; 4] {
        [self.batch, self.width, self.height, self.channels]
    }
}

/// A loaded network.
pub trait Network: Send + Sync {
    fn input_shape(&self) -> InputShape;

    /// Run a forward pass on a `[1, height, width, channels]` input.
    fn execute(&self, input: Array4<f32>) -> Result<ArrayD<f32>, DetectError>;
}

/// Shared handle to a loaded network.
#[derive(Clone)]
pub struct ModelHandle {
    net: Arc<dyn Network>,
    input_shape: InputShape,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("input_shape", &self.input_shape)
            .finish()
    }
}

impl ModelHandle {
    pub fn new(net: Arc<dyn Network>) -> Self {
        let input_shape = net.input_shape();
        Self { net, input_shape }
    }

    pub fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    pub fn execute(&self, input: Array4<f32>) -> Result<ArrayD<f32>, DetectError> {
        self.net.execute(input)
    }

    /// Run one throwaway pass so that lazy initialisation happens before the first frame.
    pub fn warm_up(&self) -> Result<(), DetectError> {
        let shape = self.input_shape;
        let dummy = Array4::<f32>::ones((1, shape.height, shape.width, shape.channels));
        self.execute(dummy)
            .map(|_| ())
            .map_err(|err| DetectError::ModelLoad(format!("warm-up failed: {}", err)))
    }
}

/// Something able to turn a model artifact into a handle.
pub trait ModelLoader: Send + Sync {
    fn load(
        &self,
        path: &Path,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<ModelHandle, DetectError>;
}

/// Load a model and warm it up.
pub fn load_model(
    loader: &dyn ModelLoader,
    path: &Path,
    on_progress: &mut dyn FnMut(f32),
) -> Result<ModelHandle, DetectError> {
    log::info!("Loading model from {}", path.display());
    let handle = loader.load(path, on_progress)?;
    handle.warm_up()?;
    log::info!(
        "Model ready with input shape {:?}",
        handle.input_shape().as_array()
    );

    Ok(handle)
}

/// Loads `.onnx` files with tract.
#[derive(Debug, Clone, Default)]
pub struct OnnxLoader {
    /// Square input size to force onto models with dynamic input shapes.
    pub input_size: Option<u32>,
}

impl ModelLoader for OnnxLoader {
    fn load(
        &self,
        path: &Path,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<ModelHandle, DetectError> {
        let bytes = read_with_progress(path, on_progress)?;
        let net = TractNetwork::from_reader(&mut Cursor::new(bytes), self.input_size)?;
        Ok(ModelHandle::new(Arc::new(net)))
    }
}

/// Read a whole file, reporting the fraction read so far.
fn read_with_progress(
    path: &Path,
    on_progress: &mut dyn FnMut(f32),
) -> Result<Vec<u8>, DetectError> {
    let load_err = |err: std::io::Error| DetectError::ModelLoad(format!("{}: {}", path.display(), err));

    let mut file = File::open(path).map_err(load_err)?;
    let total = file.metadata().map_err(load_err)?.len() as usize;
    let mut bytes = Vec::with_capacity(total);
    let mut chunk = vec![0_u8; READ_CHUNK];

    loop {
        let read = file.read(&mut chunk).map_err(load_err)?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);
        if total > 0 {
            on_progress((bytes.len() as f32 / total as f32).min(1.0));
        }
    }
    on_progress(1.0);
    log::debug!(
        "Model file size: {:.2} MB",
        bytes.len() as f64 / (1024.0 * 1024.0)
    );

    Ok(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Nchw,
    Nhwc,
}

/// ONNX network executed by tract.
pub struct TractNetwork {
    plan: NnModel,
    layout: Layout,
    input_shape: InputShape,
}

impl TractNetwork {
    pub fn from_reader(reader: &mut dyn Read, input_size: Option<u32>) -> Result<Self, DetectError> {
        let load_err = |err: TractError| DetectError::ModelLoad(format!("{:#}", err));

        let mut model = tract_onnx::onnx().model_for_read(reader).map_err(load_err)?;
        if let Some(size) = input_size {
            let size = size as usize;
            let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size));
            model = model.with_input_fact(0, input_fact).map_err(load_err)?;
        }
        let model = model.into_optimized().map_err(load_err)?;

        let dims = model
            .input_fact(0)
            .map_err(load_err)?
            .shape
            .as_concrete()
            .map(|dims| dims.to_vec())
            .ok_or_else(|| {
                DetectError::ModelLoad(
                    "model input shape is not fully known, configure an input size".into(),
                )
            })?;
        let (layout, input_shape) = input_layout(&dims)?;
        let plan = model.into_runnable().map_err(load_err)?;

        Ok(Self {
            plan,
            layout,
            input_shape,
        })
    }
}

impl Network for TractNetwork {
    fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    fn execute(&self, input: Array4<f32>) -> Result<ArrayD<f32>, DetectError> {
        let input = match self.layout {
            Layout::Nhwc => input,
            Layout::Nchw => input.permuted_axes([0, 3, 1, 2]).as_standard_layout().into_owned(),
        };
        let tensor: Tensor = input.into();

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|err| DetectError::Decode(format!("inference failed: {:#}", err)))?;
        let output = outputs
            .first()
            .ok_or_else(|| DetectError::Decode("model produced no output".into()))?;
        let array = output
            .to_array_view::<f32>()
            .map_err(|err| DetectError::Decode(format!("{:#}", err)))?
            .to_owned();

        Ok(array)
    }
}

/// Work out memory layout and `[batch, width, height, channels]` from ONNX input dims.
fn input_layout(dims: &[usize]) -> Result<(Layout, InputShape), DetectError> {
    match dims {
        &[batch, 3, height, width] => Ok((
            Layout::Nchw,
            InputShape {
                batch,
                width,
                height,
                channels: 3,
            },
        )),
        &[batch, height, width, 3] => Ok((
            Layout::Nhwc,
            InputShape {
                batch,
                width,
                height,
                channels: 3,
            },
        )),
        other => Err(DetectError::ModelLoad(format!(
            "expected a 4D RGB input, got {:?}",
            other
        ))),
    }
}
