//! Cosine similarity and symmetric Int8 quantization.
//!
//! Scale cancels out of the cosine ratio, so `scale` is kept only for exact
//! dequantization and never needed during scoring.

/// Cosine similarity between two Float32 vectors. Returns `0.0` for
/// mismatched lengths or a zero-magnitude operand rather than erroring, since
/// the store treats dimension mismatch as a caller-level diagnostic, not a
/// panic.
pub fn cosine_f32(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let n = a.len();
    let chunks = n / 8;
    let mut dot = [0f32; 8];
    let mut norm_a = [0f32; 8];
    let mut norm_b = [0f32; 8];

    for c in 0..chunks {
        let base = c * 8;
        for lane in 0..8 {
            let x = a[base + lane];
            let y = b[base + lane];
            dot[lane] += x * y;
            norm_a[lane] += x * x;
            norm_b[lane] += y * y;
        }
    }

    let mut dot_sum: f32 = dot.iter().sum();
    let mut norm_a_sum: f32 = norm_a.iter().sum();
    let mut norm_b_sum: f32 = norm_b.iter().sum();

    for i in (chunks * 8)..n {
        let x = a[i];
        let y = b[i];
        dot_sum += x * y;
        norm_a_sum += x * x;
        norm_b_sum += y * y;
    }

    if norm_a_sum == 0.0 || norm_b_sum == 0.0 {
        return 0.0;
    }
    dot_sum / (norm_a_sum.sqrt() * norm_b_sum.sqrt())
}

/// Symmetric Int8 quantization: `(i8_values, scale, l2_norm)`.
pub fn quantize(v: &[f32]) -> (Vec<i8>, f32, f32) {
    let max_abs = v.iter().fold(0f32, |acc, x| acc.max(x.abs()));
    let scale = if max_abs > 0.0 { 127.0 / max_abs } else { 1.0 };

    let quantized: Vec<i8> = v
        .iter()
        .map(|x| (x * scale).round().clamp(-127.0, 127.0) as i8)
        .collect();

    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    (quantized, scale, norm)
}

/// Cosine similarity on Int8-quantized vectors, widened to Int32 before
/// accumulating so the dot product and norms cannot overflow.
pub fn cosine_i8(a: &[i8], b: &[i8]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot: i32 = 0;
    let mut norm_a: i32 = 0;
    let mut norm_b: i32 = 0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let xi = x as i32;
        let yi = y as i32;
        dot += xi * yi;
        norm_a += xi * xi;
        norm_b += yi * yi;
    }

    if norm_a == 0 || norm_b == 0 {
        return 0.0;
    }
    dot as f32 / ((norm_a as f32).sqrt() * (norm_b as f32).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_f32_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        assert!((cosine_f32(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_f32_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0, 0.0];
        assert!(cosine_f32(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_f32_rejects_unequal_lengths() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 2.0];
        assert_eq!(cosine_f32(&a, &b), 0.0);
    }

    #[test]
    fn cosine_f32_zero_magnitude_is_zero() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_f32(&a, &b), 0.0);
    }

    #[test]
    fn quantize_self_similarity_is_near_one() {
        let v = vec![0.3, -1.2, 4.5, -0.8, 2.1, 0.0, -3.3, 1.1];
        let (q, _scale, norm) = quantize(&v);
        assert!(norm > 0.0);
        let sim = cosine_i8(&q, &q);
        assert!((sim - 1.0).abs() < 1e-4, "self-similarity was {sim}");
    }

    #[test]
    fn quantize_zero_vector_has_scale_one() {
        let v = vec![0.0; 8];
        let (q, scale, norm) = quantize(&v);
        assert_eq!(scale, 1.0);
        assert_eq!(norm, 0.0);
        assert!(q.iter().all(|&x| x == 0));
    }

    #[test]
    fn cosine_i8_tracks_cosine_f32() {
        let a: Vec<f32> = (0..256).map(|i| ((i * 37) % 101) as f32 - 50.0).collect();
        let b: Vec<f32> = (0..256).map(|i| ((i * 53) % 97) as f32 - 48.0).collect();
        let (qa, _, _) = quantize(&a);
        let (qb, _, _) = quantize(&b);
        let exact = cosine_f32(&a, &b);
        let approx = cosine_i8(&qa, &qb);
        assert!(
            (exact - approx).abs() < 0.02,
            "exact={exact} approx={approx}"
        );
    }
}
