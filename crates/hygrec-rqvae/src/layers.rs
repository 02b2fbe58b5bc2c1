//! Dense MLP used as encoder and decoder.
//!
//! Each block is:
//!
//! ```text
//! input ──► Dropout ──► Linear ──► [BatchNorm] ──► Activation ──► output
//! ```
//!
//! The final block keeps only dropout and the linear projection. Weights are
//! Xavier-normal and biases start at zero.

use burn::module::{Ignored, Module, Param};
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, Linear, LinearConfig,
};
use burn::tensor::activation::{gelu, leaky_relu, relu, sigmoid, silu, softplus};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::fmt;
use std::str::FromStr;

use crate::error::RqVaeError;

/// Negative slope of `leakyrelu`.
const LEAKY_RELU_SLOPE: f64 = 0.01;

/// Activation applied after every hidden block.
///
/// `Gelu`, `Silu` and `Softplus` extend the classic set so that non-default
/// nonlinearities can be selected by name from a config file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Sigmoid,
    Tanh,
    Relu,
    LeakyRelu,
    Gelu,
    Silu,
    Softplus,
    Identity,
}

impl FromStr for Activation {
    type Err = RqVaeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_lowercase().as_str() {
            "sigmoid" => Ok(Self::Sigmoid),
            "tanh" => Ok(Self::Tanh),
            "relu" => Ok(Self::Relu),
            "leakyrelu" | "leaky_relu" => Ok(Self::LeakyRelu),
            "gelu" => Ok(Self::Gelu),
            "silu" | "swish" => Ok(Self::Silu),
            "softplus" => Ok(Self::Softplus),
            "none" | "identity" => Ok(Self::Identity),
            _ => Err(RqVaeError::UnsupportedActivation(name.to_string())),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::Relu => "relu",
            Self::LeakyRelu => "leakyrelu",
            Self::Gelu => "gelu",
            Self::Silu => "silu",
            Self::Softplus => "softplus",
            Self::Identity => "none",
        };
        f.write_str(name)
    }
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Sigmoid => sigmoid(x),
            Self::Tanh => x.tanh(),
            Self::Relu => relu(x),
            Self::LeakyRelu => leaky_relu(x, LEAKY_RELU_SLOPE),
            Self::Gelu => gelu(x),
            Self::Silu => silu(x),
            Self::Softplus => softplus(x, 1.0),
            Self::Identity => x,
        }
    }
}

/// One `Dropout -> Linear -> [BatchNorm] -> Activation` block.
#[derive(Module, Debug)]
pub struct MlpBlock<B: Backend> {
    dropout: Dropout,
    linear: Linear<B>,
    norm: Option<BatchNorm<B>>,
    /// `None` on the output block.
    activation: Ignored<Option<Activation>>,
}

impl<B: Backend> MlpBlock<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(self.dropout.forward(x));
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        match self.activation.0 {
            Some(activation) => activation.apply(x),
            None => x,
        }
    }
}

/// Stack of [`MlpBlock`]s mapping `[batch, widths[0]]` to `[batch, widths[last]]`.
#[derive(Module, Debug)]
pub struct MlpLayers<B: Backend> {
    blocks: Vec<MlpBlock<B>>,
}

impl<B: Backend> MlpLayers<B> {
    /// Build the stack for consecutive `widths`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for fewer than two widths.
    pub fn new(
        widths: &[usize],
        dropout_prob: f64,
        activation: Activation,
        bn: bool,
        device: &B::Device,
    ) -> Result<Self, RqVaeError> {
        if widths.len() < 2 {
            return Err(RqVaeError::InvalidConfig(format!(
                "an MLP needs at least two widths, got {widths:?}"
            )));
        }

        let last = widths.len() - 2;
        let blocks = widths
            .windows(2)
            .enumerate()
            .map(|(idx, pair)| {
                let (d_in, d_out) = (pair[0], pair[1]);
                let mut linear = LinearConfig::new(d_in, d_out)
                    .with_initializer(Initializer::XavierNormal { gain: 1.0 })
                    .init(device);
                linear.bias = Some(Param::from_tensor(Tensor::zeros([d_out], device)));

                let hidden = idx != last;
                MlpBlock {
                    dropout: DropoutConfig::new(dropout_prob).init(),
                    linear,
                    norm: (bn && hidden).then(|| BatchNormConfig::new(d_out).init(device)),
                    activation: Ignored(hidden.then_some(activation)),
                }
            })
            .collect();

        Ok(Self { blocks })
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.blocks
            .iter()
            .fold(x, |hidden, block| block.forward(hidden))
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::module::AutodiffModule;
    use burn::tensor::Distribution;
    use hygrec_core::backend::{init_cpu_device, CpuAutodiffBackend, CpuBackend};

    fn values<B: Backend>(x: Tensor<B, 2>) -> Vec<f32> {
        x.into_data().convert::<f32>().to_vec::<f32>().expect("vec")
    }

    #[test]
    fn test_activation_parse() {
        assert_eq!("ReLU".parse::<Activation>().unwrap(), Activation::Relu);
        assert_eq!(
            "leakyrelu".parse::<Activation>().unwrap(),
            Activation::LeakyRelu
        );
        assert_eq!("none".parse::<Activation>().unwrap(), Activation::Identity);

        let err = "mish".parse::<Activation>().unwrap_err();
        assert!(err.to_string().contains("mish"));
    }

    #[test]
    fn test_activation_display_parses_back() {
        for act in [
            Activation::Sigmoid,
            Activation::Tanh,
            Activation::Relu,
            Activation::LeakyRelu,
            Activation::Gelu,
            Activation::Silu,
            Activation::Softplus,
            Activation::Identity,
        ] {
            assert_eq!(act.to_string().parse::<Activation>().unwrap(), act);
        }
    }

    #[test]
    fn test_mlp_shapes() {
        let device = init_cpu_device();
        let mlp = MlpLayers::<CpuBackend>::new(&[12, 8, 4], 0.0, Activation::Relu, false, &device)
            .expect("mlp");
        assert_eq!(mlp.n_blocks(), 2);

        let x = Tensor::<CpuBackend, 2>::ones([5, 12], &device);
        assert_eq!(mlp.forward(x).dims(), [5, 4]);
    }

    #[test]
    fn test_output_block_is_linear() {
        let device = init_cpu_device();
        let mlp =
            MlpLayers::<CpuBackend>::new(&[4, 4], 0.0, Activation::Sigmoid, false, &device)
                .expect("mlp");
        let x = Tensor::<CpuBackend, 2>::ones([3, 4], &device).mul_scalar(-10.0);
        let y = mlp.forward(x.clone());
        let y_neg = mlp.forward(x.neg());

        // Zero bias and no activation: f(-x) == -f(x)
        let diff: f32 = (y + y_neg).abs().sum().into_scalar();
        assert!(diff < 1e-4, "diff = {diff}");
    }

    #[test]
    fn test_zero_bias_init() {
        let device = init_cpu_device();
        let mlp = MlpLayers::<CpuBackend>::new(&[6, 3], 0.0, Activation::Tanh, false, &device)
            .expect("mlp");
        let y = mlp.forward(Tensor::zeros([2, 6], &device));
        let total: f32 = y.abs().sum().into_scalar();
        assert_eq!(total, 0.0);
    }

    #[test]
    fn test_too_few_widths() {
        let device = init_cpu_device();
        let result = MlpLayers::<CpuBackend>::new(&[6], 0.0, Activation::Relu, false, &device);
        assert!(matches!(result, Err(RqVaeError::InvalidConfig(_))));
    }

    #[test]
    fn test_batch_norm_only_in_hidden_blocks() {
        let device = init_cpu_device();
        let mlp = MlpLayers::<CpuBackend>::new(&[12, 8, 6, 4], 0.1, Activation::Relu, true, &device)
            .expect("mlp");
        assert_eq!(mlp.n_blocks(), 3);

        let (output, hidden) = mlp.blocks.split_last().expect("blocks");
        assert!(hidden.iter().all(|b| b.norm.is_some()));
        assert!(hidden.iter().all(|b| b.activation.0 == Some(Activation::Relu)));
        assert!(output.norm.is_none());
        assert!(output.activation.0.is_none());

        let plain = MlpLayers::<CpuBackend>::new(&[12, 8, 4], 0.1, Activation::Relu, false, &device)
            .expect("mlp");
        assert!(plain.blocks.iter().all(|b| b.norm.is_none()));
    }

    #[test]
    fn test_batch_norm_and_dropout_forward_in_training_and_inference() {
        let device = init_cpu_device();
        let mlp = MlpLayers::<CpuAutodiffBackend>::new(
            &[12, 8, 4],
            0.1,
            Activation::Relu,
            true,
            &device,
        )
        .expect("mlp");
        let x: Tensor<CpuAutodiffBackend, 2> =
            Tensor::random([16, 12], Distribution::Normal(0.0, 1.0), &device);

        let y = mlp.forward(x.clone());
        assert_eq!(y.dims(), [16, 4]);
        let grads = y.powf_scalar(2.0).mean().backward();
        let weight_grad = mlp.blocks[0].linear.weight.val().grad(&grads);
        assert!(weight_grad.is_some());

        let frozen = mlp.valid();
        let y = frozen.forward(x.inner());
        assert_eq!(y.dims(), [16, 4]);
        assert!(values(y).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_dropout_inactive_on_inner_backend() {
        let device = init_cpu_device();
        let mlp = MlpLayers::<CpuAutodiffBackend>::new(
            &[32, 32, 8],
            0.5,
            Activation::Relu,
            true,
            &device,
        )
        .expect("mlp");
        let x: Tensor<CpuAutodiffBackend, 2> =
            Tensor::random([8, 32], Distribution::Normal(0.0, 1.0), &device);

        // Training mode drops different units on every call
        let a = values(mlp.forward(x.clone()));
        let b = values(mlp.forward(x.clone()));
        assert_ne!(a, b);

        let frozen = mlp.valid();
        let first = values(frozen.forward(x.clone().inner()));
        let second = values(frozen.forward(x.inner()));
        assert_eq!(first, second);
    }
}
