//! IDX-format MNIST reader with optional download.

use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;

const MNIST_URL_BASE: &str = "https://storage.googleapis.com/cvdf-datasets/mnist";
const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

/// One split of raw MNIST data: pixel bytes plus integer labels.
pub struct MnistData {
    images: Vec<Vec<u8>>,
    labels: Vec<u8>,
    pub num_rows: usize,
    pub num_cols: usize,
}

impl MnistData {
    /// Wraps already-loaded samples, e.g. synthetic data in tests.
    pub fn from_raw(images: Vec<Vec<u8>>, labels: Vec<u8>, num_rows: usize, num_cols: usize) -> Self {
        assert_eq!(images.len(), labels.len(), "image and label count mismatch");
        Self {
            images,
            labels,
            num_rows,
            num_cols,
        }
    }

    pub fn new(root: &str, train: bool, download: bool) -> io::Result<Self> {
        let (image_filename, label_filename) = if train {
            ("train-images-idx3-ubyte.gz", "train-labels-idx1-ubyte.gz")
        } else {
            ("t10k-images-idx3-ubyte.gz", "t10k-labels-idx1-ubyte.gz")
        };

        let root_path = Path::new(root);
        if !root_path.exists() {
            fs::create_dir_all(root_path)?;
        }
        let image_path = root_path.join(image_filename);
        let label_path = root_path.join(label_filename);

        if download {
            if !image_path.exists() {
                println!("downloading {}...", image_filename);
                download_file(&format!("{}/{}", MNIST_URL_BASE, image_filename), &image_path)?;
            }
            if !label_path.exists() {
                println!("downloading {}...", label_filename);
                download_file(&format!("{}/{}", MNIST_URL_BASE, label_filename), &label_path)?;
            }
        }

        let (images, num_rows, num_cols) = read_idx3_file(&image_path)?;
        let labels = read_idx1_file(&label_path)?;
        if images.len() != labels.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} images but {} labels", images.len(), labels.len()),
            ));
        }

        Ok(Self {
            images,
            labels,
            num_rows,
            num_cols,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn image(&self, index: usize) -> &[u8] {
        &self.images[index]
    }

    pub fn label(&self, index: usize) -> u8 {
        self.labels[index]
    }

    /// Splits the data at `at`, returning `(front, back)`. Used to hold out
    /// a validation slice from the training set.
    pub fn split(mut self, at: usize) -> (MnistData, MnistData) {
        let back_images = self.images.split_off(at);
        let back_labels = self.labels.split_off(at);
        let back = MnistData {
            images: back_images,
            labels: back_labels,
            num_rows: self.num_rows,
            num_cols: self.num_cols,
        };
        (self, back)
    }
}

fn download_file(url: &str, path: &Path) -> io::Result<()> {
    let resp = ureq::get(url)
        .call()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let mut file = File::create(path)?;
    let mut reader = resp.into_reader();
    io::copy(&mut reader, &mut file)?;
    Ok(())
}

fn read_idx3_file(path: &Path) -> io::Result<(Vec<Vec<u8>>, usize, usize)> {
    let mut reader = Cursor::new(decompress(path)?);

    let magic = reader.read_u32::<BigEndian>()?;
    if magic != IMAGE_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid magic number {} for IDX3 file", magic),
        ));
    }
    let count = reader.read_u32::<BigEndian>()? as usize;
    let rows = reader.read_u32::<BigEndian>()? as usize;
    let cols = reader.read_u32::<BigEndian>()? as usize;

    let image_size = rows * cols;
    let mut images = Vec::with_capacity(count);
    for _ in 0..count {
        let mut buf = vec![0u8; image_size];
        reader.read_exact(&mut buf)?;
        images.push(buf);
    }
    Ok((images, rows, cols))
}

fn read_idx1_file(path: &Path) -> io::Result<Vec<u8>> {
    let mut reader = Cursor::new(decompress(path)?);

    let magic = reader.read_u32::<BigEndian>()?;
    if magic != LABEL_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid magic number {} for IDX1 file", magic),
        ));
    }
    let count = reader.read_u32::<BigEndian>()? as usize;
    let mut labels = vec![0u8; count];
    reader.read_exact(&mut labels)?;
    Ok(labels)
}

fn decompress(path: &Path) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut buffer = Vec::new();
    decoder.read_to_end(&mut buffer)?;
    Ok(buffer)
}
