//! Pure, stateless vector arithmetic over fixed-length `f32` slices.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VectorError {
    #[error("vectors have mismatched lengths: {0} vs {1}")]
    ShapeMismatch(usize, usize),
    #[error("vector has zero magnitude")]
    ZeroVector,
}

pub type Result<T> = std::result::Result<T, VectorError>;

/// Dot product of two equal-length vectors.
pub fn dot(u: &[f32], v: &[f32]) -> Result<f32> {
    if u.len() != v.len() {
        return Err(VectorError::ShapeMismatch(u.len(), v.len()));
    }
    Ok(u.iter().zip(v.iter()).map(|(a, b)| a * b).sum())
}

/// Euclidean (L2) norm of a vector.
pub fn norm(v: &[f32]) -> Result<f32> {
    if v.is_empty() {
        return Err(VectorError::ShapeMismatch(0, 0));
    }
    Ok(v.iter().map(|x| x * x).sum::<f32>().sqrt())
}

/// Cosine similarity between two equal-length, non-zero vectors. Result
/// lies in `[-1, 1]` by construction.
pub fn cosine(u: &[f32], v: &[f32]) -> Result<f32> {
    let d = dot(u, v)?;
    let nu = norm(u)?;
    let nv = norm(v)?;
    if nu == 0.0 || nv == 0.0 {
        return Err(VectorError::ZeroVector);
    }
    Ok(d / (nu * nv))
}

/// Element-wise mean of a non-empty slice of equal-length vectors.
pub fn centroid(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let first_len = match vectors.first() {
        Some(v) => v.len(),
        None => return Err(VectorError::ShapeMismatch(0, 0)),
    };
    let mut sum = vec![0.0f32; first_len];
    for v in vectors {
        if v.len() != first_len {
            return Err(VectorError::ShapeMismatch(first_len, v.len()));
        }
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    for x in sum.iter_mut() {
        *x /= n;
    }
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_is_symmetric() {
        let u = vec![1.0, 0.0, 1.0];
        let v = vec![0.0, 1.0, 1.0];
        assert_eq!(cosine(&u, &v), cosine(&v, &u));
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let u = vec![1.0, 0.0];
        let v = vec![0.0, 1.0];
        let sim = cosine(&u, &v).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn cosine_rejects_mismatched_lengths() {
        let u = vec![1.0, 2.0];
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine(&u, &v), Err(VectorError::ShapeMismatch(2, 3)));
    }

    #[test]
    fn cosine_rejects_zero_vector() {
        let u = vec![0.0, 0.0];
        let v = vec![1.0, 1.0];
        assert_eq!(cosine(&u, &v), Err(VectorError::ZeroVector));
    }

    #[test]
    fn normalized_vectors_cosine_equals_dot() {
        let u = vec![0.6, 0.8];
        let v = vec![0.8, 0.6];
        let cos = cosine(&u, &v).unwrap();
        let d = dot(&u, &v).unwrap();
        assert!((cos - d).abs() < 1e-6);
    }

    #[test]
    fn centroid_of_single_vector_is_itself() {
        let v = vec![vec![1.0, 2.0, 3.0]];
        assert_eq!(centroid(&v).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn centroid_averages_elementwise() {
        let v = vec![vec![0.0, 0.0], vec![2.0, 4.0]];
        assert_eq!(centroid(&v).unwrap(), vec![1.0, 2.0]);
    }
}
