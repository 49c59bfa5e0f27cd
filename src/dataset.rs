use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;
use tch::{data::Iter2, Device, Tensor};

use crate::configs::Config;


const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str  = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str  = "t10k-labels-idx1-ubyte";
const IDX_FILES: [&str; 4] = [TRAIN_IMAGES, TRAIN_LABELS, TEST_IMAGES, TEST_LABELS];

const IDX_IMAGES_MAGIC: u32 = 2051;
const IDX_HEADER_LEN: usize = 16;

// CIFAR-10 binary version: one tarball holding six fixed-size batch files.
const CIFAR_ARCHIVE: &str = "cifar-10-binary.tar.gz";
const CIFAR_FILES: [&str; 6] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
    "test_batch.bin",
];
const CIFAR_IMAGE_SHAPE: (i64, i64, i64) = (3, 32, 32);

const PARTIAL_SUFFIX: &str = "part";


#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DatasetKind {
    Mnist,
    FashionMnist,
    Kmnist,
    Cifar10,
}

impl DatasetKind {
    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::Mnist => "mnist",
            DatasetKind::FashionMnist => "fashion-mnist",
            DatasetKind::Kmnist => "kmnist",
            DatasetKind::Cifar10 => "cifar-10",
        }
    }

    fn url(&self) -> &'static str {
        match self {
            // CVDF mirror of http://yann.lecun.com/exdb/mnist/
            DatasetKind::Mnist => "https://storage.googleapis.com/cvdf-datasets/mnist/",
            DatasetKind::FashionMnist => "http://fashion-mnist.s3-website.eu-central-1.amazonaws.com/",
            DatasetKind::Kmnist => "http://codh.rois.ac.jp/kmnist/dataset/kmnist/",
            DatasetKind::Cifar10 => "https://www.cs.toronto.edu/~kriz/",
        }
    }
}



/// Normalized images as [N, C, H, W] float tensors, labels as [N] int64 tensors.
pub struct ImageDataset {
    pub train_images: Tensor,
    pub train_labels: Tensor,
    pub test_images: Tensor,
    pub test_labels: Tensor,
}



impl ImageDataset {
    /// Downloads any missing split file into `<data_dir>/<dataset>/`, then loads
    /// both splits from there.
    pub fn load(cfg: &Config) -> Result<Self> {
        let dir = Path::new(cfg.data_dir).join(cfg.dataset.name());
        download(cfg.dataset, &dir)?;
        return Self::from_cache_dir(&dir, cfg);
    }

    /// Loads already downloaded split files and normalizes them with the
    /// configured mean/std.
    pub fn from_cache_dir(dir: &Path, cfg: &Config) -> Result<Self> {
        let (m, (channels, rows, cols)) = match cfg.dataset {
            DatasetKind::Cifar10 => {
                let m = tch::vision::cifar::load_dir(dir)
                    .with_context(|| format!("failed to load cifar-10 from {}", dir.display()))?;
                (m, CIFAR_IMAGE_SHAPE)
            },
            kind => {
                let (rows, cols) = read_idx_image_shape(&dir.join(TRAIN_IMAGES))?;
                let m = tch::vision::mnist::load_dir(dir)
                    .with_context(|| format!("failed to load {} from {}", kind.name(), dir.display()))?;
                (m, (1, rows, cols))
            },
        };

        // Pixels come in scaled to [0, 1]; IDX images additionally come in flat.
        let prepare = |images: &Tensor| {
            normalize(&images.view([-1, channels, rows, cols]), cfg.norm_mean, cfg.norm_std)
        };
        let dataset = Self::from_tensors(
            prepare(&m.train_images),
            m.train_labels,
            prepare(&m.test_images),
            m.test_labels,
            cfg.num_classes,
            )?;

        tracing::info!(
            "Loaded {}: {} train / {} test images",
            cfg.dataset.name(),
            dataset.train_len(),
            dataset.test_len()
            );
        return Ok(dataset);
    }

    pub fn from_tensors(
        train_images: Tensor,
        train_labels: Tensor,
        test_images: Tensor,
        test_labels: Tensor,
        num_classes: i64,
        ) -> Result<Self> {

        for (split, images, labels) in [("train", &train_images, &train_labels), ("test", &test_images, &test_labels)] {
            let images_size = images.size();
            let labels_size = labels.size();
            ensure!(images_size.len() == 4, "{} images must be [N, C, H, W], got {:?}", split, images_size);
            ensure!(labels_size.len() == 1, "{} labels must be [N], got {:?}", split, labels_size);
            ensure!(
                images_size[0] == labels_size[0],
                "{} split has {} images but {} labels", split, images_size[0], labels_size[0]
                );
            ensure!(labels_size[0] > 0, "{} split is empty", split);

            let min_label = labels.min().int64_value(&[]);
            let max_label = labels.max().int64_value(&[]);
            if min_label < 0 || max_label >= num_classes {
                bail!(
                    "{} labels must lie in [0, {}), found range [{}, {}]",
                    split, num_classes, min_label, max_label
                    );
            }
        }
        ensure!(
            train_images.size()[1..] == test_images.size()[1..],
            "train and test images differ in shape: {:?} vs {:?}",
            train_images.size(),
            test_images.size()
            );

        Ok(ImageDataset {
            train_images,
            train_labels,
            test_images,
            test_labels,
        })
    }

    /// (channels, height, width) of a single sample.
    pub fn image_shape(&self) -> (i64, i64, i64) {
        let size = self.train_images.size();
        return (size[1], size[2], size[3]);
    }

    pub fn train_len(&self) -> i64 {
        self.train_labels.size()[0]
    }

    pub fn test_len(&self) -> i64 {
        self.test_labels.size()[0]
    }

    /// Training batches in a fresh random order; the last batch may be short.
    pub fn train_iter(&self, batch_size: i64, device: Device) -> Iter2 {
        let mut iter = Iter2::new(&self.train_images, &self.train_labels, batch_size);
        iter.shuffle().to_device(device).return_smaller_last_batch();
        return iter;
    }

    /// Test batches in dataset order; the last batch may be short.
    pub fn test_iter(&self, batch_size: i64, device: Device) -> Iter2 {
        let mut iter = Iter2::new(&self.test_images, &self.test_labels, batch_size);
        iter.to_device(device).return_smaller_last_batch();
        return iter;
    }
}



fn normalize(images: &Tensor, mean: f64, std: f64) -> Tensor {
    (images - mean) / std
}



fn download(kind: DatasetKind, dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    }

    let fetched = match kind {
        DatasetKind::Cifar10 => {
            if CIFAR_FILES.iter().all(|name| dir.join(name).exists()) {
                tracing::debug!("Using cached cifar-10 batches in {}", dir.display());
                return Ok(());
            }
            let fetched = fetch_missing(dir, &[CIFAR_ARCHIVE], |name, part| {
                let url = format!("{}{}", kind.url(), name);
                tracing::info!("Downloading {}", url);
                save(open_url(&url)?, part)
            })?;
            extract_cifar_batches(&dir.join(CIFAR_ARCHIVE), dir)?;
            fetched
        },
        _ => fetch_missing(dir, &IDX_FILES, |name, part| {
            let url = format!("{}{}.gz", kind.url(), name);
            tracing::info!("Downloading {}", url);
            unpack(open_url(&url)?, part)
        })?,
    };

    if !fetched.is_empty() {
        tracing::info!("Stored {} file(s) in {}", fetched.len(), dir.display());
    }
    Ok(())
}



/// Runs `fetch` for every file absent from `dir`. Each fetch writes to a
/// `.part` sibling that only replaces the real file once complete, so an
/// interrupted run never leaves a truncated file behind under the real name.
fn fetch_missing<F>(dir: &Path, files: &[&str], mut fetch: F) -> Result<Vec<PathBuf>>
where
    F: FnMut(&str, &Path) -> Result<()>,
{
    let mut fetched = Vec::new();
    for name in files {
        let path = dir.join(name);
        if path.exists() {
            tracing::debug!("Using cached {}", path.display());
            continue;
        }

        write_atomically(&path, |part| fetch(name, part))?;
        fetched.push(path);
    }
    Ok(fetched)
}



fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}



fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let part = partial_path(path);
    if let Err(err) = write(&part) {
        if part.exists() {
            if let Err(rm_err) = fs::remove_file(&part) {
                tracing::warn!("Failed to remove partial file {}: {}", part.display(), rm_err);
            }
        }
        return Err(err);
    }

    fs::rename(&part, path)
        .with_context(|| format!("failed to move {} to {}", part.display(), path.display()))?;
    Ok(())
}



fn open_url(url: &str) -> Result<impl Read> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("failed to download {}", url))?;
    Ok(response.into_reader())
}



fn save<R: Read>(mut reader: R, path: &Path) -> Result<()> {
    let mut output = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    io::copy(&mut reader, &mut output)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}



/// Gunzips `reader` into `path`.
fn unpack<R: Read>(reader: R, path: &Path) -> Result<()> {
    save(GzDecoder::new(reader), path)
}



/// Pulls the batch files out of the CIFAR-10 tarball into `dir`, dropping the
/// archive's top-level directory.
fn extract_cifar_batches(archive_path: &Path, dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open {}", archive_path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let entries = archive.entries()
        .with_context(|| format!("failed to read {}", archive_path.display()))?;
    for entry in entries {
        let mut entry = entry.with_context(|| format!("corrupt entry in {}", archive_path.display()))?;
        let name = match entry.path()?.file_name().and_then(|name| name.to_str()) {
            Some(name) if CIFAR_FILES.contains(&name) => name.to_string(),
            _ => continue,
        };

        let path = dir.join(&name);
        if path.exists() {
            continue;
        }
        tracing::debug!("Extracting {}", name);
        write_atomically(&path, |part| save(&mut entry, part))?;
    }

    let missing: Vec<&str> = CIFAR_FILES.iter()
                                        .copied()
                                        .filter(|name| !dir.join(name).exists())
                                        .collect();
    ensure!(missing.is_empty(), "{} lacks {:?}", archive_path.display(), missing);
    Ok(())
}



/// Reads (rows, cols) from the 16-byte header of an IDX image file.
fn read_idx_image_shape(path: &Path) -> Result<(i64, i64)> {
    let mut header = [0u8; IDX_HEADER_LEN];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut header))
        .with_context(|| format!("failed to read IDX header of {}", path.display()))?;

    let word = |idx: usize| {
        u32::from_be_bytes([header[4 * idx], header[4 * idx + 1], header[4 * idx + 2], header[4 * idx + 3]])
    };
    if word(0) != IDX_IMAGES_MAGIC {
        bail!("{} is not an IDX image file (magic {})", path.display(), word(0));
    }
    Ok((word(2) as i64, word(3) as i64))
}
