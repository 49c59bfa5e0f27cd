use crate::dataset::DatasetKind;


#[derive(Debug, Copy, Clone)]
pub struct Config {
    pub dataset: DatasetKind,
    pub data_dir: &'static str,
    pub batch_size: i64,
    pub n_epochs: i64,
    pub learning_rate: f64,
    pub momentum: f64,
    pub hidden_dim_fc1: i64,
    pub hidden_dim_fc2: i64,
    pub num_classes: i64,
    pub norm_mean: f64,
    pub norm_std: f64,
    pub log_interval: i64,      // Print running loss every n mini-batches
    pub seed: Option<i64>,      // None leaves libtorch unseeded
}



// Kuzushiji-MNIST, grayscale 28x28
pub const KMNIST_CONFIG: Config = Config {
    dataset: DatasetKind::Kmnist,
    data_dir: "data",
    batch_size: 4,
    n_epochs: 2,
    learning_rate: 1e-3,
    momentum: 0.9,
    hidden_dim_fc1: 200,        // 120 in the LeNet tutorial
    hidden_dim_fc2: 100,        // 84 in the LeNet tutorial
    num_classes: 10,
    norm_mean: 0.5,
    norm_std: 0.5,
    log_interval: 2000,
    seed: None,
};



#[allow(dead_code)]
pub const MNIST_CONFIG: Config = Config {
    dataset: DatasetKind::Mnist,
    ..KMNIST_CONFIG
};



#[allow(dead_code)]
pub const FASHION_MNIST_CONFIG: Config = Config {
    dataset: DatasetKind::FashionMnist,
    ..KMNIST_CONFIG
};



// Colour 32x32 images, CNN flatten size becomes 16 * 5 * 5 = 400
#[allow(dead_code)]
pub const CIFAR10_CONFIG: Config = Config {
    dataset: DatasetKind::Cifar10,
    ..KMNIST_CONFIG
};
