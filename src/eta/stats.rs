use crate::eta::types::HistoricalRoute;

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the population standard deviation given a pre-computed mean.
/// Returns 0.0 for empty input.
pub fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

    variance.sqrt()
}

/// Weighted mean; `None` when the weights sum to zero.
pub fn weighted_mean(pairs: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    Some(pairs.iter().map(|(v, w)| v * w).sum::<f64>() / total)
}

/// `stddev / mean` of the average speeds on `routes`; 0.0 with fewer than two.
pub fn speed_variation(routes: &[HistoricalRoute]) -> f64 {
    let speeds: Vec<f64> = routes.iter().filter_map(|r| r.average_speed_kmh()).collect();
    if speeds.len() < 2 {
        return 0.0;
    }
    let m = mean(&speeds);
    if m <= 0.0 {
        return 0.0;
    }
    stddev(&speeds, m) / m
}

/// One minus the mean relative error of past predictions, clamped to
/// `[0, 1]`. `None` when no route carries a recorded prediction.
pub fn historical_accuracy(routes: &[HistoricalRoute]) -> Option<f64> {
    let errors: Vec<f64> = routes
        .iter()
        .filter(|r| r.duration_minutes > 0.0)
        .filter_map(|r| {
            r.predicted_minutes
                .map(|p| (p - r.duration_minutes).abs() / r.duration_minutes)
        })
        .collect();
    if errors.is_empty() {
        return None;
    }
    Some((1.0 - mean(&errors)).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransportMode;
    use chrono::Utc;

    fn route(distance_km: f64, duration_minutes: f64, predicted: Option<f64>) -> HistoricalRoute {
        HistoricalRoute {
            origin_latitude: 0.0,
            origin_longitude: 0.0,
            destination_latitude: 1.0,
            destination_longitude: 1.0,
            mode: TransportMode::Van,
            distance_km,
            duration_minutes,
            departed_at: Utc::now(),
            weather_factor: 1.0,
            traffic_density: 0.5,
            predicted_minutes: predicted,
        }
    }

    #[test]
    fn test_mean_and_stddev() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&v);
        assert_eq!(m, 5.0);
        assert_eq!(stddev(&v, m), 2.0);
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(stddev(&[], 0.0), 0.0);
    }

    #[test]
    fn test_weighted_mean() {
        assert_eq!(weighted_mean(&[(10.0, 1.0), (20.0, 3.0)]), Some(17.5));
        assert_eq!(weighted_mean(&[(10.0, 0.0)]), None);
    }

    #[test]
    fn test_speed_variation_constant_speed_is_zero() {
        let routes = vec![route(40.0, 60.0, None), route(80.0, 120.0, None)];
        assert!(speed_variation(&routes).abs() < 1e-12);
    }

    #[test]
    fn test_historical_accuracy() {
        assert_eq!(historical_accuracy(&[route(40.0, 60.0, None)]), None);

        let routes = vec![route(40.0, 100.0, Some(90.0)), route(40.0, 100.0, Some(110.0))];
        let acc = historical_accuracy(&routes).unwrap();
        assert!((acc - 0.9).abs() < 1e-12);
    }
}
