use crate::eta::types::QualityLabel;

/// Model disagreement (coefficient of variation across estimators) above
/// which the label drops one step.
pub const DISAGREEMENT_LIMIT: f64 = 0.35;

/// Converts the amount and accuracy of historical evidence into a label.
///
/// | Routes | Accuracy | Label  |
/// |--------|----------|--------|
/// | >= 20  | >= 0.90  | high   |
/// | >= 10  | >= 0.80  | medium |
/// | other  |          | low    |
///
/// When the estimators disagree by more than [`DISAGREEMENT_LIMIT`] the
/// result is downgraded one step.
pub fn quality_label(routes: usize, accuracy: f64, disagreement: f64) -> QualityLabel {
    let label = match (routes, accuracy) {
        (r, a) if r >= 20 && a >= 0.9 => QualityLabel::High,
        (r, a) if r >= 10 && a >= 0.8 => QualityLabel::Medium,
        _ => QualityLabel::Low,
    };

    if disagreement > DISAGREEMENT_LIMIT {
        match label {
            QualityLabel::High => QualityLabel::Medium,
            _ => QualityLabel::Low,
        }
    } else {
        label
    }
}
