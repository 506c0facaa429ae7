/// Linear-interpolated percentile of an ascending slice, `percentile` in [0, 100].
///
/// The rank is `percentile / 100 * (len - 1)`; a fractional rank interpolates between its
/// floor and ceiling elements. Returns None for an empty slice.
pub fn calculate_percentile(values: &[f64], percentile: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let percentile = percentile.clamp(0.0, 100.0);
    let index = (percentile / 100.0) * (values.len() - 1) as f64;
    let lower_index = index.floor() as usize;
    let upper_index = index.ceil() as usize;

    if lower_index == upper_index {
        return Some(values[lower_index]);
    }

    let lower_value = values[lower_index];
    let upper_value = values[upper_index];
    let interpolation_factor = index - lower_index as f64;
    Some(lower_value + (upper_value - lower_value) * interpolation_factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_undefined() {
        assert_eq!(calculate_percentile(&[], 0.0), None);
        assert_eq!(calculate_percentile(&[], 50.0), None);
        assert_eq!(calculate_percentile(&[], 100.0), None);
    }

    #[test]
    fn test_bounds() {
        let values = [3.0, 8.0, 9.0, 21.0];
        assert_eq!(calculate_percentile(&values, 0.0), Some(3.0));
        assert_eq!(calculate_percentile(&values, 100.0), Some(21.0));

        let single = [7.0];
        assert_eq!(calculate_percentile(&single, 0.0), Some(7.0));
        assert_eq!(calculate_percentile(&single, 99.0), Some(7.0));
    }

    #[test]
    fn test_interpolation() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        // rank 2.5 sits halfway between 30 and 40
        assert_eq!(calculate_percentile(&values, 50.0), Some(35.0));
        // rank 4.5
        assert_eq!(calculate_percentile(&values, 90.0), Some(55.0));
        // rank 1.0 is exact
        assert_eq!(calculate_percentile(&values, 20.0), Some(20.0));
    }

    #[test]
    fn test_monotonic_in_percentile() {
        let values = [1.0, 1.0, 2.0, 5.0, 13.0, 13.5, 40.0, 41.0, 100.0];
        let mut previous = f64::MIN;
        for step in 0..=200 {
            let p = step as f64 / 2.0;
            let current = calculate_percentile(&values, p).unwrap();
            assert!(current >= previous, "p{} gave {} after {}", p, current, previous);
            previous = current;
        }
    }
}
