use std::time::{Duration, Instant};

use anyhow::Result;
use tch::nn::{self, ModuleT, OptimizerConfig};
use tch::Tensor;

use crate::configs::Config;
use crate::dataset::ImageDataset;
use crate::models::Classifier;


/// Average loss over one `log_interval` window of mini-batches.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RunningLoss {
    pub epoch: i64,
    pub batch: i64,
    pub loss: f64,
}

#[derive(Debug, Clone)]
pub struct TrainStats {
    pub elapsed: Duration,
    pub batch_losses: Vec<f64>,
    pub running_losses: Vec<RunningLoss>,
}



pub fn sgd(model: &Classifier, cfg: &Config) -> Result<nn::Optimizer> {
    let opt = nn::Sgd {
        momentum: cfg.momentum,
        ..Default::default()
    }.build(&model.vs, cfg.learning_rate)?;
    return Ok(opt);
}



/// One zero-grad / forward / backward / step cycle. Returns the batch loss.
pub fn train_step(
    model: &Classifier,
    opt: &mut nn::Optimizer,
    images: &Tensor,
    labels: &Tensor
    ) -> f64 {

    opt.zero_grad();
    let loss = model.forward_t(images, true).cross_entropy_for_logits(labels);
    loss.backward();
    opt.step();
    return loss.double_value(&[]);
}



pub fn train(model: &Classifier, data: &ImageDataset, cfg: &Config) -> Result<TrainStats> {
    let mut opt = sgd(model, cfg)?;
    let mut batch_losses = Vec::new();
    let mut running_losses = Vec::new();

    tracing::info!("Training {} model for {} epochs", model.label(), cfg.n_epochs);
    let start = Instant::now();
    for epoch in 0..cfg.n_epochs {
        let mut running_loss = 0.0;
        for (idx, (images, labels)) in data.train_iter(cfg.batch_size, model.vs.device()).enumerate() {
            let loss = train_step(model, &mut opt, &images, &labels);
            batch_losses.push(loss);

            running_loss += loss;
            let batch = idx as i64 + 1;
            if batch % cfg.log_interval == 0 {
                let avg = running_loss / cfg.log_interval as f64;
                println!("[{}, {:5}] {} loss: {:.3}", epoch + 1, batch, model.label(), avg);
                running_losses.push(RunningLoss { epoch: epoch + 1, batch, loss: avg });
                running_loss = 0.0;
            }
        }
    }
    let elapsed = start.elapsed();
    tracing::info!("{} model trained in {:.2?}", model.label(), elapsed);

    Ok(TrainStats {
        elapsed,
        batch_losses,
        running_losses,
    })
}
