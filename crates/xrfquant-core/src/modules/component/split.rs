//! Piecewise-linear weights for splitting a background component into
//! independently fitted energy regions.
//!
//! Weights from adjacent regions sum to exactly one at every energy,
//! so the per-region coefficients can move independently while the
//! total background stays continuous.

/// Weight of region `region_index` at `energy`, for a split defined by
/// the sorted `boundaries` list. One boundary per region; the ramps
/// between consecutive boundaries form the partition of unity.
/// Returns 1.0 when `boundaries` is empty (no split) and a negative
/// value for an out-of-range region index.
pub fn split_weight(energy: f64, boundaries: &[f64], region_index: usize) -> f64 {
    if boundaries.is_empty() {
        return 1.0;
    }
    if region_index >= boundaries.len() {
        return -1.0;
    }
    // Left-hand side of the region.
    if region_index == 0 {
        if energy <= boundaries[0] {
            return 1.0;
        }
    } else {
        let lower = boundaries[region_index - 1];
        let upper = boundaries[region_index];
        if energy < lower {
            return 0.0;
        }
        if energy < upper {
            let span = upper - lower;
            if span == 0.0 {
                return 1.0;
            }
            return (energy - lower) / span;
        }
    }
    // Right-hand side of the region.
    if region_index + 1 == boundaries.len() {
        if energy > boundaries[region_index] {
            return 1.0;
        }
    } else {
        let lower = boundaries[region_index];
        let upper = boundaries[region_index + 1];
        if energy > upper {
            return 0.0;
        }
        if energy >= lower {
            let span = upper - lower;
            if span == 0.0 {
                return 1.0;
            }
            return 1.0 - (energy - lower) / span;
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::split_weight;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1.0e-12,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn no_boundaries_means_single_full_weight_region() {
        assert_close(split_weight(1234.5, &[], 0), 1.0);
    }

    #[test]
    fn out_of_range_region_index_is_flagged() {
        assert!(split_weight(1000.0, &[2000.0], 1) < 0.0);
    }

    #[test]
    fn two_region_split_partitions_unity_everywhere() {
        let boundaries = [2000.0, 6000.0];
        let mut energy = 0.0;
        while energy <= 9000.0 {
            let total: f64 = (0..2).map(|r| split_weight(energy, &boundaries, r)).sum();
            assert_close(total, 1.0);
            energy += 137.0;
        }
        // Plateau and ramp spot checks.
        assert_close(split_weight(1000.0, &boundaries, 0), 1.0);
        assert_close(split_weight(4000.0, &boundaries, 0), 0.5);
        assert_close(split_weight(4000.0, &boundaries, 1), 0.5);
        assert_close(split_weight(8000.0, &boundaries, 1), 1.0);
    }

    #[test]
    fn many_region_split_partitions_unity_everywhere() {
        let boundaries = [1000.0, 2500.0, 4000.0, 7000.0, 11000.0];
        let mut energy = -500.0;
        while energy <= 13000.0 {
            let total: f64 = (0..boundaries.len())
                .map(|r| split_weight(energy, &boundaries, r))
                .sum();
            assert_close(total, 1.0);
            energy += 73.0;
        }
    }

    #[test]
    fn interior_region_is_zero_outside_its_ramps() {
        let boundaries = [1000.0, 2000.0, 3000.0];
        assert_close(split_weight(500.0, &boundaries, 1), 0.0);
        assert_close(split_weight(3500.0, &boundaries, 1), 0.0);
        assert_close(split_weight(2000.0, &boundaries, 1), 1.0);
    }
}
