mod configs;
mod dataset;
mod evaluate;
mod models;
mod runner;
mod trainer;

#[cfg(test)]
mod testing;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::configs::KMNIST_CONFIG;


fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("");
    println!("=====================================");
    println!("=== Training FC vs CNN on {:<7} ===", KMNIST_CONFIG.dataset.name());
    println!("=====================================");

    runner::run(&KMNIST_CONFIG)
}
