use tch::nn::ModuleT;
use tch::{Device, Kind};

use crate::dataset::ImageDataset;
use crate::models::Classifier;


#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Accuracy {
    pub correct: i64,
    pub total: i64,
}

impl Accuracy {
    /// Floored integer percentage, `100 * correct / total`.
    pub fn percent(&self) -> i64 {
        if self.total == 0 {
            return 0;
        }
        100 * self.correct / self.total
    }

    pub fn percent_f64(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.correct as f64 / self.total as f64
    }
}



/// Scores every model on the test split in a single gradient-free pass.
/// Each batch is moved to the device of the model scoring it, so the models
/// need not share a device. Accuracies come back in the order of `models`.
pub fn evaluate(models: &[&Classifier], data: &ImageDataset, batch_size: i64) -> Vec<Accuracy> {
    tch::no_grad(|| {
        let mut accuracies = vec![Accuracy::default(); models.len()];
        for (images, labels) in data.test_iter(batch_size, Device::Cpu) {
            let n_samples = labels.size()[0];
            for (model, accuracy) in models.iter().zip(accuracies.iter_mut()) {
                let device = model.vs.device();
                let images = images.to_device(device);
                let labels = labels.to_device(device);

                // The class with the highest logit is the prediction.
                let predicted = model.forward_t(&images, false).argmax(-1, false);
                accuracy.correct += predicted.eq_tensor(&labels)
                                             .sum(Kind::Int64)
                                             .int64_value(&[]);
                accuracy.total += n_samples;
            }
        }
        accuracies
    })
}



#[cfg(test)]
mod tests {
    use super::*;
    use tch::Tensor;

    use crate::configs::KMNIST_CONFIG;
    use crate::models::{snapshot_parameters, Architecture};
    use crate::testing::synthetic_dataset;

    fn models() -> (Classifier, Classifier) {
        let fc = Classifier::new(Architecture::Fc, (1, 28, 28), &KMNIST_CONFIG, Device::Cpu).unwrap();
        let cnn = Classifier::new(Architecture::Cnn, (1, 28, 28), &KMNIST_CONFIG, Device::Cpu).unwrap();
        (fc, cnn)
    }

    #[test]
    fn percent_is_floored() {
        let accuracy = Accuracy { correct: 8999, total: 10_000 };
        assert_eq!(accuracy.percent(), 89);
        assert!((accuracy.percent_f64() - 89.99).abs() < 1e-9);
        assert_eq!(Accuracy::default().percent(), 0);
    }

    #[test]
    fn counts_every_test_sample() {
        // 10 samples do not divide into batches of 4.
        let (_guard, data) = synthetic_dataset(5, 8, 10, (1, 28, 28));
        let (fc, cnn) = models();

        let accuracies = evaluate(&[&fc, &cnn], &data, 4);
        assert_eq!(accuracies.len(), 2);
        for accuracy in accuracies {
            assert_eq!(accuracy.total, 10);
            assert!(accuracy.correct >= 0 && accuracy.correct <= 10);
            assert!((0..=100).contains(&accuracy.percent()));
        }
    }

    #[test]
    fn matches_manual_argmax() {
        let (_guard, data) = synthetic_dataset(9, 8, 12, (1, 28, 28));
        let (fc, _) = models();

        let logits = tch::no_grad(|| fc.forward_t(&data.test_images, false));
        let expected = logits.argmax(-1, false)
                             .eq_tensor(&data.test_labels)
                             .sum(Kind::Int64)
                             .int64_value(&[]);

        let accuracy = evaluate(&[&fc], &data, 4)[0];
        assert_eq!(accuracy.correct, expected);
    }

    #[test]
    fn leaves_parameters_untouched() {
        let (_guard, data) = synthetic_dataset(2, 8, 10, (1, 28, 28));
        let (fc, cnn) = models();
        let before: Vec<Vec<(String, Tensor)>> = [&fc, &cnn].iter().map(|m| snapshot_parameters(&m.vs)).collect();

        evaluate(&[&fc, &cnn], &data, 4);

        let after: Vec<Vec<(String, Tensor)>> = [&fc, &cnn].iter().map(|m| snapshot_parameters(&m.vs)).collect();
        for (model_before, model_after) in before.iter().zip(after.iter()) {
            assert_eq!(model_before.len(), model_after.len());
            for ((name, a), (_, b)) in model_before.iter().zip(model_after.iter()) {
                assert!(a.equal(b), "{} changed during evaluation", name);
            }
        }
    }

    #[test]
    fn scores_each_model_on_its_own_device() {
        let (_guard, data) = synthetic_dataset(4, 8, 10, (1, 28, 28));
        let fc = Classifier::new(Architecture::Fc, (1, 28, 28), &KMNIST_CONFIG, Device::Cpu).unwrap();
        let cnn_device = if tch::Cuda::is_available() { Device::Cuda(0) } else { Device::Cpu };
        let cnn = Classifier::new(Architecture::Cnn, (1, 28, 28), &KMNIST_CONFIG, cnn_device).unwrap();

        let together = evaluate(&[&fc, &cnn], &data, 4);
        let alone = vec![evaluate(&[&fc], &data, 4)[0], evaluate(&[&cnn], &data, 4)[0]];
        assert_eq!(together, alone);
        assert!(together.iter().all(|accuracy| accuracy.total == 10));
    }
}
