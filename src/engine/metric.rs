use crate::backend::{Backend, Elm};
use crate::engine::Graph;
use crate::error::Result;

/// Fraction of samples whose arg-max class score matches the one-hot label.
///
/// `scores`: (batch, classes); `labels`: (batch, classes) one-hot.
pub fn accuracy<B: Backend>(scores: &B::Tensor, labels: &B::Tensor) -> Elm {
    let shape = B::shape(scores);
    let (n, k) = (shape[0], shape[1]);
    let s = B::to_vec(scores);
    let l = B::to_vec(labels);

    let mut correct = 0usize;
    for row in 0..n {
        let predicted = argmax(&s[row * k..(row + 1) * k]);
        let expected = argmax(&l[row * k..(row + 1) * k]);
        if predicted == expected {
            correct += 1;
        }
    }
    correct as Elm / n as Elm
}

/// Held-out accuracy of a trained graph over a whole data split.
pub fn calculate_accuracy<B: Backend>(
    graph: &mut Graph<B>,
    data: &B::Tensor,
    labels: &B::Tensor,
) -> Result<Elm> {
    let scores = graph.predict(data.clone())?;
    Ok(accuracy::<B>(&scores, labels))
}

fn argmax(row: &[Elm]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}
