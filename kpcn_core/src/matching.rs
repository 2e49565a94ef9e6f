//! Approximate bipartite matching between two point sets.
//!
//! The matcher runs a fixed ladder of soft assignments. Each level uses a
//! Gaussian-like affinity `exp(level * d²)`, starting very sharp
//! (`level = -4^8`) and finishing with a uniform fill (`level = 0`). Each level
//! distributes the mass still left on either side. The result is a dense
//! `n × m` transport plan whose rows and columns sum to (approximately) the
//! per-point capacities.
//!
//! This is an approximation of optimal transport, not an exact solver.

use crate::error::{CoreError, Result};

/// Highest exponent of the level ladder (`level = -4^8`).
const FIRST_LEVEL_EXP: i32 = 8;
/// Lowest exponent of the ladder; this level is replaced by a uniform fill.
const LAST_LEVEL_EXP: i32 = -2;

/// Compute an approximate matching between two flat point buffers.
///
/// `xyz1` holds `n` points and `xyz2` holds `m` points, both as
/// `[x0, y0, z0, x1, ...]`. Returns a row-major `n × m` plan.
pub fn approx_match(n: usize, m: usize, xyz1: &[f32], xyz2: &[f32]) -> Result<Vec<f32>> {
    check_len(n, xyz1)?;
    check_len(m, xyz2)?;

    let mut plan = vec![0.0f32; n * m];
    if n == 0 || m == 0 {
        return Ok(plan);
    }

    let factor_l = (n.max(m) / n) as f64;
    let factor_r = (n.max(m) / m) as f64;
    let mut saturated_l = vec![factor_l; n];
    let mut saturated_r = vec![factor_r; m];
    let mut weight = vec![0.0f64; n * m];

    for j in (LAST_LEVEL_EXP..=FIRST_LEVEL_EXP).rev() {
        let level = if j == LAST_LEVEL_EXP {
            0.0
        } else {
            -(4.0f64.powi(j))
        };

        for k in 0..n {
            for l in 0..m {
                let d2 = squared_distance(xyz1, k, xyz2, l);
                weight[k * m + l] = (level * d2).exp() * saturated_r[l];
            }
        }

        // Normalise rows to the left capacity, accumulate column demand.
        let mut column_sum = vec![1e-9f64; m];
        for k in 0..n {
            let row = &mut weight[k * m..(k + 1) * m];
            let s: f64 = 1e-9 + row.iter().sum::<f64>();
            for (l, w) in row.iter_mut().enumerate() {
                *w = *w / s * saturated_l[k];
                column_sum[l] += *w;
            }
        }

        // Ratio by which each column must shrink to respect its capacity.
        for l in 0..m {
            column_sum[l] = (saturated_r[l] / column_sum[l]).min(1.0);
        }

        let mut column_used = vec![0.0f64; m];
        for k in 0..n {
            let row = &mut weight[k * m..(k + 1) * m];
            let mut row_used = 0.0;
            for (l, w) in row.iter_mut().enumerate() {
                *w *= column_sum[l];
                row_used += *w;
                column_used[l] += *w;
            }
            saturated_l[k] = (saturated_l[k] - row_used).max(0.0);
        }
        for l in 0..m {
            saturated_r[l] = (saturated_r[l] - column_used[l]).max(0.0);
        }

        for (p, w) in plan.iter_mut().zip(weight.iter()) {
            *p += *w as f32;
        }
    }

    Ok(plan)
}

/// Total cost of a transport plan: `Σ plan[k, l] * |p_k - q_l|`.
pub fn match_cost(n: usize, m: usize, xyz1: &[f32], xyz2: &[f32], plan: &[f32]) -> Result<f32> {
    check_len(n, xyz1)?;
    check_len(m, xyz2)?;
    if plan.len() != n * m {
        return Err(CoreError::InvalidPointData {
            expected: n * m,
            got: plan.len(),
        });
    }

    let mut cost = 0.0f64;
    for k in 0..n {
        for l in 0..m {
            let d = squared_distance(xyz1, k, xyz2, l).sqrt();
            cost += d * plan[k * m + l] as f64;
        }
    }
    Ok(cost as f32)
}

/// Batched [`approx_match`]: `batch` pairs laid out back to back.
pub fn approx_match_batch(
    batch: usize,
    n: usize,
    m: usize,
    xyz1: &[f32],
    xyz2: &[f32],
) -> Result<Vec<f32>> {
    check_len(batch * n, xyz1)?;
    check_len(batch * m, xyz2)?;

    let mut plans = Vec::with_capacity(batch * n * m);
    for b in 0..batch {
        let p = &xyz1[b * n * 3..(b + 1) * n * 3];
        let q = &xyz2[b * m * 3..(b + 1) * m * 3];
        plans.extend(approx_match(n, m, p, q)?);
    }
    Ok(plans)
}

fn check_len(points: usize, buffer: &[f32]) -> Result<()> {
    if buffer.len() != points * 3 {
        return Err(CoreError::InvalidPointData {
            expected: points * 3,
            got: buffer.len(),
        });
    }
    Ok(())
}

#[inline]
fn squared_distance(a: &[f32], i: usize, b: &[f32], j: usize) -> f64 {
    let dx = (a[i * 3] - b[j * 3]) as f64;
    let dy = (a[i * 3 + 1] - b[j * 3 + 1]) as f64;
    let dz = (a[i * 3 + 2] - b[j * 3 + 2]) as f64;
    dx * dx + dy * dy + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_points(n: usize, spacing: f32) -> Vec<f32> {
        (0..n)
            .flat_map(|i| [i as f32 * spacing, (i % 2) as f32 * spacing, 0.0])
            .collect()
    }

    #[test]
    fn test_identical_sets_match_diagonally() {
        let pts = grid_points(6, 0.5);
        let plan = approx_match(6, 6, &pts, &pts).unwrap();

        for k in 0..6 {
            assert!(plan[k * 6 + k] > 0.99, "diagonal {} = {}", k, plan[k * 6 + k]);
        }
        let cost = match_cost(6, 6, &pts, &pts, &plan).unwrap();
        assert!(cost < 1e-3, "cost = {}", cost);
    }

    #[test]
    fn test_translated_set_cost() {
        let p = grid_points(4, 1.0);
        let q: Vec<f32> = p
            .chunks(3)
            .flat_map(|c| [c[0], c[1], c[2] + 0.1])
            .collect();
        let plan = approx_match(4, 4, &p, &q).unwrap();
        let cost = match_cost(4, 4, &p, &q, &plan).unwrap();

        // Every point moves by 0.1, and each carries unit mass.
        assert!((cost - 0.4).abs() < 1e-2, "cost = {}", cost);
    }

    #[test]
    fn test_rejects_bad_buffer() {
        let err = approx_match(2, 2, &[0.0; 5], &[0.0; 6]).unwrap_err();
        assert_eq!(err, CoreError::InvalidPointData { expected: 6, got: 5 });
    }

    #[test]
    fn test_batch_layout() {
        let a = grid_points(3, 0.7);
        let mut xyz1 = a.clone();
        xyz1.extend(a.iter().map(|v| v + 1.0));
        let plans = approx_match_batch(2, 3, 3, &xyz1, &xyz1).unwrap();
        assert_eq!(plans.len(), 2 * 9);
        let single = approx_match(3, 3, &xyz1[9..], &xyz1[9..]).unwrap();
        assert_eq!(&plans[9..], single.as_slice());
    }
}
