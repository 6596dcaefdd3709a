use gradnet::backend::ndarray::NdArray;
use gradnet::backend::Backend;
use gradnet::data::collate;
use gradnet::data::mnist::MnistData;

fn synthetic(samples: usize) -> MnistData {
    let images: Vec<Vec<u8>> = (0..samples)
        .map(|s| vec![(s * 50) as u8; 4])
        .collect();
    let labels: Vec<u8> = (0..samples).map(|s| (s % 3) as u8).collect();
    MnistData::from_raw(images, labels, 2, 2)
}

#[test]
fn collate_shapes_and_normalization() {
    let data = synthetic(3);
    let (images, labels) = collate::to_tensors::<NdArray>(&data, 3);

    assert_eq!(NdArray::shape(&images), vec![3, 1, 2, 2]);
    assert_eq!(NdArray::shape(&labels), vec![3, 3]);

    let pixels = NdArray::to_vec(&images);
    // Sample 1 is filled with byte 50 -> 50/255.
    assert!((pixels[4] - 50.0 / 255.0).abs() < 1e-6);
    assert!(pixels.iter().all(|&p| (0.0..=1.0).contains(&p)));
}

#[test]
fn collate_labels_are_one_hot() {
    let data = synthetic(3);
    let (_, labels) = collate::to_tensors::<NdArray>(&data, 3);
    let v = NdArray::to_vec(&labels);
    assert_eq!(
        v,
        vec![
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        ]
    );
}

#[test]
fn split_holds_out_the_tail() {
    let data = synthetic(5);
    let (front, back) = data.split(3);
    assert_eq!(front.len(), 3);
    assert_eq!(back.len(), 2);
    // Sample 3 of the original is sample 0 of the holdout.
    assert_eq!(back.image(0), &[150, 150, 150, 150]);
    assert_eq!(back.label(0), 0);
}
