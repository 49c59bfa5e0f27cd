//! Helpers shared by the unit tests.
//!
//! libtorch keeps a single global generator, so every test that draws random
//! numbers (weight init, shuffling, synthetic data) holds `RNG_LOCK` while it
//! runs, otherwise parallel tests would interleave their draws.

use std::sync::{Mutex, MutexGuard};

use tch::{Device, Kind, Tensor};

use crate::dataset::ImageDataset;


static RNG_LOCK: Mutex<()> = Mutex::new(());


pub fn seeded(seed: i64) -> MutexGuard<'static, ()> {
    let guard = RNG_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    tch::manual_seed(seed);
    guard
}


/// Random images in [-1, 1] with random labels in [0, 10).
pub fn synthetic_dataset(
    seed: i64,
    n_train: i64,
    n_test: i64,
    image_shape: (i64, i64, i64),
    ) -> (MutexGuard<'static, ()>, ImageDataset) {

    let guard = seeded(seed);
    let (c, h, w) = image_shape;
    let images = |n: i64| Tensor::rand(&[n, c, h, w], (Kind::Float, Device::Cpu)) * 2.0 - 1.0;
    let labels = |n: i64| Tensor::randint(10, &[n], (Kind::Int64, Device::Cpu));

    let data = ImageDataset::from_tensors(images(n_train), labels(n_train), images(n_test), labels(n_test), 10)
        .unwrap();
    (guard, data)
}
