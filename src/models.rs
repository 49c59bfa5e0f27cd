use anyhow::{bail, Result};
use tch::nn::{self, ModuleT};
use tch::{Device, Tensor};

use crate::configs::Config;


// LeNet feature extractor
const CONV1_CHANNELS: i64 = 6;
const CONV2_CHANNELS: i64 = 16;
const KERNEL_SIZE: i64 = 5;
const POOL_SIZE: i64 = 2;


#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Architecture {
    Fc,
    Cnn,
}

impl Architecture {
    pub fn label(&self) -> &'static str {
        match self {
            Architecture::Fc => "FC",
            Architecture::Cnn => "CNN",
        }
    }
}



fn fc_net(
    vs: &nn::Path,
    image_dims: i64,
    hidden_dim_fc1: i64,
    hidden_dim_fc2: i64,
    num_classes: i64
    ) -> nn::FuncT<'static> {

    let fc1 = nn::linear(vs / "fc1", image_dims, hidden_dim_fc1, Default::default());
    let fc2 = nn::linear(vs / "fc2", hidden_dim_fc1, hidden_dim_fc2, Default::default());
    let fc3 = nn::linear(vs / "fc3", hidden_dim_fc2, num_classes, Default::default());

    return nn::func_t(move |xs, _train| {
        // Flatten everything but the batch dim, raw logits out.
        xs.flatten(1, -1)
          .apply(&fc1)
          .relu()
          .apply(&fc2)
          .relu()
          .apply(&fc3)
    });
}



fn conv_net(
    vs: &nn::Path,
    in_channels: i64,
    flatten_dims: i64,
    hidden_dim_fc1: i64,
    hidden_dim_fc2: i64,
    num_classes: i64
    ) -> nn::FuncT<'static> {

    let conv1 = nn::conv2d(vs / "conv1", in_channels, CONV1_CHANNELS, KERNEL_SIZE, Default::default());
    let conv2 = nn::conv2d(vs / "conv2", CONV1_CHANNELS, CONV2_CHANNELS, KERNEL_SIZE, Default::default());
    let fc1 = nn::linear(vs / "fc1", flatten_dims, hidden_dim_fc1, Default::default());
    let fc2 = nn::linear(vs / "fc2", hidden_dim_fc1, hidden_dim_fc2, Default::default());
    let fc3 = nn::linear(vs / "fc3", hidden_dim_fc2, num_classes, Default::default());

    return nn::func_t(move |xs, _train| {
        xs.apply(&conv1)
          .relu()
          .max_pool2d_default(POOL_SIZE)
          .apply(&conv2)
          .relu()
          .max_pool2d_default(POOL_SIZE)
          .flatten(1, -1)
          .apply(&fc1)
          .relu()
          .apply(&fc2)
          .relu()
          .apply(&fc3)
    });
}



/// Number of features left after both conv/pool stages for an HxW input.
/// 28x28 gives 16 * 4 * 4 = 256, 32x32 gives 16 * 5 * 5 = 400.
pub fn conv_flatten_dims(height: i64, width: i64) -> Result<i64> {
    let mut spatial = [height, width];
    for _ in 0..2 {
        for dim in spatial.iter_mut() {
            let conv_out = *dim - KERNEL_SIZE + 1;
            if conv_out < POOL_SIZE {
                bail!(
                    "a {}x{} image is too small for two {}x{} conv + {}x{} pool stages",
                    height, width, KERNEL_SIZE, KERNEL_SIZE, POOL_SIZE, POOL_SIZE
                    );
            }
            *dim = conv_out / POOL_SIZE;
        }
    }
    return Ok(CONV2_CHANNELS * spatial[0] * spatial[1]);
}



/// Sum of scalar counts over every trainable tensor.
pub fn count_parameters(vs: &nn::VarStore) -> usize {
    vs.trainable_variables()
      .iter()
      .map(|t| t.numel())
      .sum()
}



/// A classifier together with the variable store that owns its weights.
#[derive(Debug)]
pub struct Classifier {
    pub architecture: Architecture,
    pub vs: nn::VarStore,
    net: nn::FuncT<'static>,
}



impl Classifier {
    /// Input sizes are derived from `image_shape` = (channels, height, width).
    pub fn new(
        architecture: Architecture,
        image_shape: (i64, i64, i64),
        cfg: &Config,
        device: Device
        ) -> Result<Self> {

        let (channels, height, width) = image_shape;
        let vs = nn::VarStore::new(device);
        let net = match architecture {
            Architecture::Fc => fc_net(
                &vs.root(),
                channels * height * width,
                cfg.hidden_dim_fc1,
                cfg.hidden_dim_fc2,
                cfg.num_classes,
                ),
            Architecture::Cnn => conv_net(
                &vs.root(),
                channels,
                conv_flatten_dims(height, width)?,
                cfg.hidden_dim_fc1,
                cfg.hidden_dim_fc2,
                cfg.num_classes,
                ),
        };

        tracing::info!(
            "Built {} model: {} trainable parameters",
            architecture.label(),
            count_parameters(&vs)
            );
        Ok(Classifier { architecture, vs, net })
    }

    pub fn num_parameters(&self) -> usize {
        count_parameters(&self.vs)
    }

    pub fn label(&self) -> &'static str {
        self.architecture.label()
    }
}

impl nn::ModuleT for Classifier {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.net.forward_t(xs, train)
    }
}



#[cfg(test)]
pub fn snapshot_parameters(vs: &nn::VarStore) -> Vec<(String, Tensor)> {
    let mut params: Vec<(String, Tensor)> = vs.variables()
                                              .into_iter()
                                              .map(|(name, t)| (name, t.detach().copy()))
                                              .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}



#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    use crate::configs::KMNIST_CONFIG;
    use crate::testing::seeded;

    #[test]
    fn fc_parameter_count() {
        let _guard = seeded(0);
        let model = Classifier::new(Architecture::Fc, (1, 28, 28), &KMNIST_CONFIG, Device::Cpu).unwrap();
        // (784 * 200 + 200) + (200 * 100 + 100) + (100 * 10 + 10)
        assert_eq!(model.num_parameters(), 178_510);
    }

    #[test]
    fn cnn_parameter_count() {
        let _guard = seeded(0);
        let model = Classifier::new(Architecture::Cnn, (1, 28, 28), &KMNIST_CONFIG, Device::Cpu).unwrap();
        // conv1 156, conv2 2416, fc1 51400, fc2 20100, fc3 1010
        assert_eq!(model.num_parameters(), 75_082);
        assert_eq!(count_parameters(&model.vs), model.num_parameters());
    }

    #[test]
    fn logits_have_one_row_per_sample() {
        let _guard = seeded(0);
        let xs = Tensor::rand(&[4, 1, 28, 28], (Kind::Float, Device::Cpu));
        for architecture in [Architecture::Fc, Architecture::Cnn] {
            let model = Classifier::new(architecture, (1, 28, 28), &KMNIST_CONFIG, Device::Cpu).unwrap();
            assert_eq!(model.forward_t(&xs, false).size(), vec![4, 10], "{}", model.label());
        }
    }

    #[test]
    fn cnn_accepts_colour_images() {
        let _guard = seeded(0);
        let xs = Tensor::rand(&[3, 3, 32, 32], (Kind::Float, Device::Cpu));
        let model = Classifier::new(Architecture::Cnn, (3, 32, 32), &KMNIST_CONFIG, Device::Cpu).unwrap();
        assert_eq!(model.forward_t(&xs, false).size(), vec![3, 10]);
    }

    #[test]
    fn flatten_dims_follow_input_resolution() {
        assert_eq!(conv_flatten_dims(28, 28).unwrap(), 256);
        assert_eq!(conv_flatten_dims(32, 32).unwrap(), 400);
        assert_eq!(conv_flatten_dims(28, 32).unwrap(), 16 * 4 * 5);
    }

    #[test]
    fn tiny_images_are_rejected_before_training() {
        assert!(conv_flatten_dims(12, 12).is_err());
        let _guard = seeded(0);
        assert!(Classifier::new(Architecture::Cnn, (1, 8, 8), &KMNIST_CONFIG, Device::Cpu).is_err());
    }
}
