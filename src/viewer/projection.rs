// Principal component projection of embedding vectors to 3D

const COMPONENTS: usize = 3;
const POWER_ITERATIONS: usize = 200;
const CONVERGENCE: f64 = 1e-10;

/// Project `vectors` onto their first three principal components
///
/// The result is deterministic: the power iteration starts from a fixed
/// vector and each component's sign is chosen so that its largest entry is
/// positive. Missing components (fewer points or dimensions than three)
/// project to zero. Vectors shorter than the first are padded with zeros.
#[inline]
pub fn project_3d(vectors: &[Vec<f32>]) -> Vec<[f32; 3]> {
    let Some(dimension) = vectors.first().map(Vec::len) else {
        return Vec::new();
    };

    let centered = center(vectors, dimension);
    let mut components: Vec<Vec<f64>> = Vec::with_capacity(COMPONENTS);
    for index in 0..COMPONENTS.min(dimension) {
        match principal_component(&centered, dimension, index, &components) {
            Some(component) => components.push(component),
            None => break,
        }
    }

    centered
        .iter()
        .map(|row| {
            let mut point = [0.0_f32; 3];
            for (axis, component) in components.iter().enumerate() {
                point[axis] = dot(row, component) as f32;
            }
            point
        })
        .collect()
}

fn center(vectors: &[Vec<f32>], dimension: usize) -> Vec<Vec<f64>> {
    let mut mean = vec![0.0_f64; dimension];
    for vector in vectors {
        for (m, v) in mean.iter_mut().zip(vector) {
            *m += f64::from(*v);
        }
    }
    let count = vectors.len() as f64;
    mean.iter_mut().for_each(|m| *m /= count);

    vectors
        .iter()
        .map(|vector| {
            (0..dimension)
                .map(|i| f64::from(vector.get(i).copied().unwrap_or(0.0)) - mean[i])
                .collect()
        })
        .collect()
}

/// Leading eigenvector of the covariance matrix orthogonal to `found`
fn principal_component(
    rows: &[Vec<f64>],
    dimension: usize,
    index: usize,
    found: &[Vec<f64>],
) -> Option<Vec<f64>> {
    // Fixed, uneven start so it is unlikely to be orthogonal to the answer
    let mut v: Vec<f64> = (0..dimension)
        .map(|i| 1.0 / ((i + index + 1) as f64).sqrt())
        .collect();
    orthogonalize(&mut v, found);
    normalize(&mut v)?;

    for _ in 0..POWER_ITERATIONS {
        // Covariance times v without materializing the matrix: X^T (X v)
        let projected: Vec<f64> = rows.iter().map(|row| dot(row, &v)).collect();
        let mut next = vec![0.0_f64; dimension];
        for (row, p) in rows.iter().zip(&projected) {
            for (n, x) in next.iter_mut().zip(row) {
                *n += x * p;
            }
        }

        orthogonalize(&mut next, found);
        normalize(&mut next)?;

        let delta: f64 = next.iter().zip(&v).map(|(a, b)| (a - b).abs()).sum();
        v = next;
        if delta < CONVERGENCE {
            break;
        }
    }

    let largest = v
        .iter()
        .copied()
        .fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
    if largest < 0.0 {
        v.iter_mut().for_each(|x| *x = -*x);
    }
    Some(v)
}

fn orthogonalize(v: &mut [f64], basis: &[Vec<f64>]) {
    for b in basis {
        let d = dot(v, b);
        for (x, y) in v.iter_mut().zip(b) {
            *x -= d * y;
        }
    }
}

/// Scale to unit length; `None` when the vector has collapsed to zero
fn normalize(v: &mut [f64]) -> Option<()> {
    let norm = dot(v, v).sqrt();
    if norm < 1e-12 {
        return None;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    Some(())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
