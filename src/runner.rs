use std::time::Duration;

use anyhow::Result;
use tch::Device;

use crate::configs::Config;
use crate::dataset::ImageDataset;
use crate::evaluate::{evaluate, Accuracy};
use crate::models::{conv_flatten_dims, Architecture, Classifier};
use crate::trainer::train;


struct ModelReport {
    label: &'static str,
    training_time: Duration,
    num_parameters: usize,
    accuracy: Accuracy,
}



pub fn run(cfg: &Config) -> Result<()> {
    if let Some(seed) = cfg.seed {
        tch::manual_seed(seed);
    }

    let data = ImageDataset::load(cfg)?;
    let image_shape = data.image_shape();
    let (channels, height, width) = image_shape;
    println!("Image dimensions: {} x {} x {}", channels, height, width);
    println!("Flattened vector size: {}", channels * height * width);
    println!("CNN flatten size: {}", conv_flatten_dims(height, width)?);

    let device = Device::cuda_if_available();
    let fc_model = Classifier::new(Architecture::Fc, image_shape, cfg, device)?;
    let cnn_model = Classifier::new(Architecture::Cnn, image_shape, cfg, device)?;

    // FC runs to completion before the CNN starts.
    let mut training_times = Vec::new();
    for model in [&fc_model, &cnn_model] {
        let stats = train(model, &data, cfg)?;
        println!("Finished Training {} model", model.label());
        tracing::debug!(
            "{} model: {} mini-batches, last window {:?}",
            model.label(),
            stats.batch_losses.len(),
            stats.running_losses.last().map(|r| format!("[{}, {}] {:.3}", r.epoch, r.batch, r.loss))
            );
        training_times.push(stats.elapsed);
    }

    let accuracies = evaluate(&[&fc_model, &cnn_model], &data, cfg.batch_size);

    let reports: Vec<ModelReport> = [&fc_model, &cnn_model].iter()
        .zip(training_times)
        .zip(accuracies)
        .map(|((model, training_time), accuracy)| ModelReport {
            label: model.label(),
            training_time,
            num_parameters: model.num_parameters(),
            accuracy,
        })
        .collect();
    print_report(&reports, data.test_len());
    Ok(())
}



fn print_report(reports: &[ModelReport], n_test_images: i64) {
    println!("");
    for report in reports {
        println!("{} training time: {:.3} sec", report.label, report.training_time.as_secs_f64());
    }
    for report in reports {
        println!("Number of {} model parameters: {}", report.label, report.num_parameters);
    }
    for report in reports {
        println!(
            "Accuracy of the {} network on the {} test images: {} % ({:.2} %)",
            report.label,
            n_test_images,
            report.accuracy.percent(),
            report.accuracy.percent_f64()
            );
    }
}
