use ndarray::linalg::general_mat_mul;
use ndarray::{s, Array2, Array4, ArrayD, Axis, Ix2, Ix4};
use ndarray_rand::{rand_distr::Normal, RandomExt};
use rand::{distributions::Uniform, rngs::StdRng, SeedableRng};

use crate::backend::{Backend, Elm};

#[derive(Debug, Clone)]
pub struct NdArray;

impl Backend for NdArray {
    type Tensor = ArrayD<f32>;

    fn zeros(shape: &[usize]) -> Self::Tensor {
        ArrayD::zeros(shape)
    }

    fn random_normal(shape: &[usize], mean: Elm, std: Elm, seed: Option<u64>) -> Self::Tensor {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        ArrayD::random_using(shape, Normal::new(mean, std).unwrap(), &mut rng)
    }

    fn random_uniform(shape: &[usize], low: Elm, high: Elm, seed: Option<u64>) -> Self::Tensor {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        ArrayD::random_using(shape, Uniform::new(low, high), &mut rng)
    }

    fn from_vec(vec: Vec<Elm>, shape: &[usize]) -> Self::Tensor {
        ArrayD::from_shape_vec(shape, vec).unwrap()
    }

    fn to_vec(tensor: &Self::Tensor) -> Vec<Elm> {
        tensor.iter().cloned().collect()
    }

    fn shape(tensor: &Self::Tensor) -> Vec<usize> {
        tensor.shape().to_vec()
    }

    fn add(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        a + b
    }

    fn sub(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        a - b
    }

    fn mul(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        a * b
    }

    fn div(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        a / b
    }

    fn scale(a: &Self::Tensor, k: Elm) -> Self::Tensor {
        a.mapv(|v| v * k)
    }

    fn matmul(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        let a_view = a.view().into_dimensionality::<Ix2>().unwrap();
        let b_view = b.view().into_dimensionality::<Ix2>().unwrap();
        a_view.dot(&b_view).into_dyn()
    }

    fn transpose(a: &Self::Tensor) -> Self::Tensor {
        a.t().as_standard_layout().to_owned()
    }

    fn reshape(a: &Self::Tensor, shape: &[usize]) -> Self::Tensor {
        a.as_standard_layout()
            .to_owned()
            .into_shape(shape)
            .unwrap()
    }

    fn sum(a: &Self::Tensor, axis: Option<usize>, keep_dims: bool) -> Self::Tensor {
        match axis {
            Some(ax) => {
                let mut res = a.sum_axis(Axis(ax)).into_dyn();
                if keep_dims {
                    let mut new_shape = res.shape().to_vec();
                    new_shape.insert(ax, 1);
                    res = res.into_shape(new_shape).unwrap();
                }
                res
            }
            None => {
                let val = a.sum();
                if keep_dims {
                    ArrayD::from_elem(vec![1; a.ndim()], val)
                } else {
                    ArrayD::from_elem(vec![], val)
                }
            }
        }
    }

    fn gt(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor {
        (a - b).mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
    }

    fn sqrt(a: &Self::Tensor) -> Self::Tensor {
        a.mapv(|v| v.sqrt())
    }

    fn log(a: &Self::Tensor) -> Self::Tensor {
        a.mapv(|v| v.ln())
    }

    fn relu(a: &Self::Tensor) -> Self::Tensor {
        a.mapv(|v| v.max(0.0))
    }

    fn softmax(a: &Self::Tensor, axis: Option<usize>) -> Self::Tensor {
        let axis = axis.unwrap_or_else(|| a.ndim() - 1);
        let mut out = a.clone();
        out.map_axis_mut(Axis(axis), |mut view| {
            let max = view.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
            view.mapv_inplace(|v| (v - max).exp());
            let sum = view.sum();
            view.mapv_inplace(|v| v / sum);
        });
        out
    }

    fn take_rows(a: &Self::Tensor, indices: &[usize]) -> Self::Tensor {
        a.select(Axis(0), indices)
    }

    fn conv2d(
        input: &Self::Tensor,
        filters: &Self::Tensor,
        stride: usize,
        pads: (usize, usize, usize, usize),
    ) -> Self::Tensor {
        let x = input.view().into_dimensionality::<Ix4>().unwrap();
        let w = filters.view().into_dimensionality::<Ix4>().unwrap();
        let (n, c, _, _) = x.dim();
        let (f, cf, fh, fw) = w.dim();
        debug_assert_eq!(c, cf, "channel mismatch between input and filters");

        let padded = pad_input(&x.to_owned(), pads);
        let (_, _, hp, wp) = padded.dim();
        let oh = (hp - fh) / stride + 1;
        let ow = (wp - fw) / stride + 1;

        let cols = im2col(&padded, fh, fw, stride, oh, ow);
        let w2 = w
            .as_standard_layout()
            .to_owned()
            .into_shape((f, c * fh * fw))
            .unwrap();
        let mut out2 = Array2::<Elm>::zeros((f, n * oh * ow));
        general_mat_mul(1.0, &w2, &cols, 0.0, &mut out2);

        let mut out = Array4::<Elm>::zeros((n, f, oh, ow));
        for nn in 0..n {
            for ff in 0..f {
                for i in 0..oh {
                    for j in 0..ow {
                        out[[nn, ff, i, j]] = out2[[ff, (nn * oh + i) * ow + j]];
                    }
                }
            }
        }
        out.into_dyn()
    }

    fn conv2d_backward(
        input: &Self::Tensor,
        filters: &Self::Tensor,
        grad_out: &Self::Tensor,
        stride: usize,
        pads: (usize, usize, usize, usize),
    ) -> (Self::Tensor, Self::Tensor) {
        let x = input.view().into_dimensionality::<Ix4>().unwrap();
        let w = filters.view().into_dimensionality::<Ix4>().unwrap();
        let gy = grad_out.view().into_dimensionality::<Ix4>().unwrap();
        let (n, c, h, wd) = x.dim();
        let (f, _, fh, fw) = w.dim();
        let (_, _, oh, ow) = gy.dim();
        let (pt, _, pl, _) = pads;

        let padded = pad_input(&x.to_owned(), pads);
        let (_, _, hp, wp) = padded.dim();
        let cols = im2col(&padded, fh, fw, stride, oh, ow);

        // Upstream gradient rearranged to (F, N*oh*ow), matching the im2col
        // product layout of the forward pass.
        let mut gy2 = Array2::<Elm>::zeros((f, n * oh * ow));
        for nn in 0..n {
            for ff in 0..f {
                for i in 0..oh {
                    for j in 0..ow {
                        gy2[[ff, (nn * oh + i) * ow + j]] = gy[[nn, ff, i, j]];
                    }
                }
            }
        }

        let mut gw2 = Array2::<Elm>::zeros((f, c * fh * fw));
        general_mat_mul(1.0, &gy2, &cols.t(), 0.0, &mut gw2);
        let grad_filters = gw2.into_shape((f, c, fh, fw)).unwrap().into_dyn();

        let w2 = w
            .as_standard_layout()
            .to_owned()
            .into_shape((f, c * fh * fw))
            .unwrap();
        let mut gcols = Array2::<Elm>::zeros((c * fh * fw, n * oh * ow));
        general_mat_mul(1.0, &w2.t(), &gy2, 0.0, &mut gcols);

        let gpadded = col2im(&gcols, (n, c, hp, wp), (fh, fw), stride, (oh, ow));
        let grad_input = gpadded
            .slice(s![.., .., pt..pt + h, pl..pl + wd])
            .to_owned()
            .into_dyn();

        (grad_input, grad_filters)
    }

    fn max_pool2d(
        input: &Self::Tensor,
        pool_h: usize,
        pool_w: usize,
        stride: usize,
    ) -> Self::Tensor {
        let x = input.view().into_dimensionality::<Ix4>().unwrap();
        let (n, c, h, w) = x.dim();
        let oh = (h - pool_h) / stride + 1;
        let ow = (w - pool_w) / stride + 1;

        let mut out = Array4::<Elm>::zeros((n, c, oh, ow));
        for nn in 0..n {
            for cc in 0..c {
                for i in 0..oh {
                    for j in 0..ow {
                        let mut best = f32::NEG_INFINITY;
                        for ki in 0..pool_h {
                            for kj in 0..pool_w {
                                best = best.max(x[[nn, cc, i * stride + ki, j * stride + kj]]);
                            }
                        }
                        out[[nn, cc, i, j]] = best;
                    }
                }
            }
        }
        out.into_dyn()
    }

    fn max_pool2d_backward(
        input: &Self::Tensor,
        grad_out: &Self::Tensor,
        pool_h: usize,
        pool_w: usize,
        stride: usize,
    ) -> Self::Tensor {
        let x = input.view().into_dimensionality::<Ix4>().unwrap();
        let gy = grad_out.view().into_dimensionality::<Ix4>().unwrap();
        let (n, c, h, w) = x.dim();
        let (_, _, oh, ow) = gy.dim();

        let mut gx = Array4::<Elm>::zeros((n, c, h, w));
        for nn in 0..n {
            for cc in 0..c {
                for i in 0..oh {
                    for j in 0..ow {
                        // First maximum wins on ties, matching the forward scan order.
                        let (mut bi, mut bj) = (i * stride, j * stride);
                        let mut best = f32::NEG_INFINITY;
                        for ki in 0..pool_h {
                            for kj in 0..pool_w {
                                let v = x[[nn, cc, i * stride + ki, j * stride + kj]];
                                if v > best {
                                    best = v;
                                    bi = i * stride + ki;
                                    bj = j * stride + kj;
                                }
                            }
                        }
                        gx[[nn, cc, bi, bj]] += gy[[nn, cc, i, j]];
                    }
                }
            }
        }
        gx.into_dyn()
    }
}

fn pad_input(x: &Array4<Elm>, pads: (usize, usize, usize, usize)) -> Array4<Elm> {
    let (pt, pb, pl, pr) = pads;
    if pt == 0 && pb == 0 && pl == 0 && pr == 0 {
        return x.clone();
    }
    let (n, c, h, w) = x.dim();
    let mut padded = Array4::<Elm>::zeros((n, c, h + pt + pb, w + pl + pr));
    padded
        .slice_mut(s![.., .., pt..pt + h, pl..pl + w])
        .assign(x);
    padded
}

// Layout: rows index (channel, ki, kj), columns index (batch, out_y, out_x).
fn im2col(
    padded: &Array4<Elm>,
    fh: usize,
    fw: usize,
    stride: usize,
    oh: usize,
    ow: usize,
) -> Array2<Elm> {
    let (n, c, _, _) = padded.dim();
    let mut cols = Array2::<Elm>::zeros((c * fh * fw, n * oh * ow));
    for nn in 0..n {
        for cc in 0..c {
            for ki in 0..fh {
                for kj in 0..fw {
                    let row = (cc * fh + ki) * fw + kj;
                    for i in 0..oh {
                        for j in 0..ow {
                            cols[[row, (nn * oh + i) * ow + j]] =
                                padded[[nn, cc, i * stride + ki, j * stride + kj]];
                        }
                    }
                }
            }
        }
    }
    cols
}

// Scatter-add inverse of im2col; overlapping windows accumulate.
fn col2im(
    gcols: &Array2<Elm>,
    dims: (usize, usize, usize, usize),
    filter: (usize, usize),
    stride: usize,
    out: (usize, usize),
) -> Array4<Elm> {
    let (n, c, hp, wp) = dims;
    let (fh, fw) = filter;
    let (oh, ow) = out;
    let mut gpadded = Array4::<Elm>::zeros((n, c, hp, wp));
    for nn in 0..n {
        for cc in 0..c {
            for ki in 0..fh {
                for kj in 0..fw {
                    let row = (cc * fh + ki) * fw + kj;
                    for i in 0..oh {
                        for j in 0..ow {
                            gpadded[[nn, cc, i * stride + ki, j * stride + kj]] +=
                                gcols[[row, (nn * oh + i) * ow + j]];
                        }
                    }
                }
            }
        }
    }
    gpadded
}
