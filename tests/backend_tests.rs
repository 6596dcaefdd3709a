use approx::assert_abs_diff_eq;
use gradnet::backend::ndarray::NdArray;
use gradnet::backend::Backend;

#[test]
fn matmul_and_transpose() {
    let a = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let b = NdArray::from_vec(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]);
    let c = NdArray::matmul(&a, &b);
    assert_eq!(NdArray::shape(&c), vec![2, 2]);
    assert_eq!(NdArray::to_vec(&c), vec![4.0, 5.0, 10.0, 11.0]);

    let at = NdArray::transpose(&a);
    assert_eq!(NdArray::shape(&at), vec![3, 2]);
    assert_eq!(NdArray::to_vec(&at), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
}

#[test]
fn broadcasting_bias_add() {
    let x = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
    let b = NdArray::from_vec(vec![10.0, 20.0], &[2]);
    let y = NdArray::add(&x, &b);
    assert_eq!(NdArray::to_vec(&y), vec![11.0, 22.0, 13.0, 24.0]);
}

#[test]
fn sum_with_kept_axis() {
    let x = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let s0 = NdArray::sum(&x, Some(0), true);
    assert_eq!(NdArray::shape(&s0), vec![1, 3]);
    assert_eq!(NdArray::to_vec(&s0), vec![5.0, 7.0, 9.0]);
    let total = NdArray::sum(&x, None, false);
    assert_eq!(NdArray::shape(&total), Vec::<usize>::new());
    assert_eq!(NdArray::to_vec(&total), vec![21.0]);
}

#[test]
fn softmax_rows_are_distributions() {
    let x = NdArray::from_vec(vec![0.0, 0.0, 1.0, 3.0], &[2, 2]);
    let p = NdArray::softmax(&x, None);
    let v = NdArray::to_vec(&p);
    assert_abs_diff_eq!(v[0], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(v[1], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(v[2] + v[3], 1.0, epsilon = 1e-6);
    assert!(v[3] > v[2]);
}

#[test]
fn take_rows_selects_in_order() {
    let x = NdArray::from_vec(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], &[3, 2]);
    let picked = NdArray::take_rows(&x, &[2, 0]);
    assert_eq!(NdArray::shape(&picked), vec![2, 2]);
    assert_eq!(NdArray::to_vec(&picked), vec![4.0, 5.0, 0.0, 1.0]);
}

#[test]
fn valid_convolution_matches_hand_computation() {
    let x = NdArray::from_vec((1..=9).map(|v| v as f32).collect(), &[1, 1, 3, 3]);
    let w = NdArray::from_vec(vec![1.0, 0.0, 0.0, 1.0], &[1, 1, 2, 2]);
    let y = NdArray::conv2d(&x, &w, 1, (0, 0, 0, 0));
    assert_eq!(NdArray::shape(&y), vec![1, 1, 2, 2]);
    // Each output adds the top-left and bottom-right of its window.
    assert_eq!(NdArray::to_vec(&y), vec![6.0, 8.0, 12.0, 14.0]);
}

#[test]
fn same_convolution_with_center_tap_is_identity() {
    let x = NdArray::from_vec((1..=9).map(|v| v as f32).collect(), &[1, 1, 3, 3]);
    let mut taps = vec![0.0; 9];
    taps[4] = 1.0;
    let w = NdArray::from_vec(taps, &[1, 1, 3, 3]);
    let y = NdArray::conv2d(&x, &w, 1, (1, 1, 1, 1));
    assert_eq!(NdArray::shape(&y), vec![1, 1, 3, 3]);
    assert_eq!(NdArray::to_vec(&y), NdArray::to_vec(&x));
}

#[test]
fn convolution_gradients_match_finite_differences() {
    let x = NdArray::from_vec(
        (0..18).map(|v| (v as f32) * 0.3 - 2.0).collect(),
        &[1, 2, 3, 3],
    );
    let w = NdArray::from_vec(
        (0..8).map(|v| (v as f32) * 0.25 - 1.0).collect(),
        &[1, 2, 2, 2],
    );
    let pads = (0, 0, 0, 0);

    let cost = |x: &<NdArray as Backend>::Tensor, w: &<NdArray as Backend>::Tensor| {
        NdArray::to_vec(&NdArray::sum(&NdArray::conv2d(x, w, 1, pads), None, false))[0]
    };
    let y = NdArray::conv2d(&x, &w, 1, pads);
    let ones = NdArray::from_vec(vec![1.0; 4], &NdArray::shape(&y));
    let (gx, gw) = NdArray::conv2d_backward(&x, &w, &ones, 1, pads);

    let h = 1e-2f32;
    for k in 0..18 {
        let mut xp = NdArray::to_vec(&x);
        xp[k] += h;
        let xp = NdArray::from_vec(xp, &[1, 2, 3, 3]);
        let mut xm = NdArray::to_vec(&x);
        xm[k] -= h;
        let xm = NdArray::from_vec(xm, &[1, 2, 3, 3]);
        let numeric = (cost(&xp, &w) - cost(&xm, &w)) / (2.0 * h);
        assert_abs_diff_eq!(numeric, NdArray::to_vec(&gx)[k], epsilon = 1e-2);
    }
    for k in 0..8 {
        let mut wp = NdArray::to_vec(&w);
        wp[k] += h;
        let wp = NdArray::from_vec(wp, &[1, 2, 2, 2]);
        let mut wm = NdArray::to_vec(&w);
        wm[k] -= h;
        let wm = NdArray::from_vec(wm, &[1, 2, 2, 2]);
        let numeric = (cost(&x, &wp) - cost(&x, &wm)) / (2.0 * h);
        assert_abs_diff_eq!(numeric, NdArray::to_vec(&gw)[k], epsilon = 1e-2);
    }
}

#[test]
fn max_pooling_keeps_window_maxima() {
    let x = NdArray::from_vec(
        vec![
            1.0, 2.0, 5.0, 6.0, //
            3.0, 4.0, 7.0, 8.0, //
            9.0, 1.0, 0.0, 2.0, //
            2.0, 8.0, 1.0, 3.0,
        ],
        &[1, 1, 4, 4],
    );
    let y = NdArray::max_pool2d(&x, 2, 2, 2);
    assert_eq!(NdArray::shape(&y), vec![1, 1, 2, 2]);
    assert_eq!(NdArray::to_vec(&y), vec![4.0, 8.0, 9.0, 3.0]);
}

#[test]
fn max_pooling_routes_gradients_to_maxima() {
    let x = NdArray::from_vec(
        vec![
            1.0, 2.0, 5.0, 6.0, //
            3.0, 4.0, 7.0, 8.0, //
            9.0, 1.0, 0.0, 2.0, //
            2.0, 8.0, 1.0, 3.0,
        ],
        &[1, 1, 4, 4],
    );
    let gy = NdArray::from_vec(vec![10.0, 20.0, 30.0, 40.0], &[1, 1, 2, 2]);
    let gx = NdArray::max_pool2d_backward(&x, &gy, 2, 2, 2);
    let v = NdArray::to_vec(&gx);
    let expected = vec![
        0.0, 0.0, 0.0, 0.0, //
        0.0, 10.0, 0.0, 20.0, //
        30.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 40.0,
    ];
    assert_eq!(v, expected);
}
