use rust_decimal::Decimal;

use crate::store::PricePoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CalculationError {
    #[error("no price points in window")]
    Empty,

    #[error("{found} price points in window, {required} required")]
    Insufficient { required: usize, found: usize },

    /// The sum of the window exceeds the 96-bit decimal range.
    #[error("sum of {count} prices is out of decimal range")]
    Overflow { count: usize },
}

/// Unweighted arithmetic mean, in decimal arithmetic throughout.
pub fn mean(points: &[PricePoint]) -> Result<Decimal, CalculationError> {
    if points.is_empty() {
        return Err(CalculationError::Empty);
    }
    let count = points.len();

    let sum = points
        .iter()
        .try_fold(Decimal::ZERO, |sum, point| sum.checked_add(point.price))
        .ok_or(CalculationError::Overflow { count })?;

    sum.checked_div(Decimal::from(count))
        .ok_or(CalculationError::Overflow { count })
}

/// Orders points by observation time. Stable, so equal timestamps keep
/// their storage order.
pub fn sort_chronologically(points: &mut [PricePoint]) {
    points.sort_by_key(|point| point.observed_at);
}

/// Mean of the whole window.
pub fn calculate_average(mut points: Vec<PricePoint>) -> Result<Decimal, CalculationError> {
    sort_chronologically(&mut points);
    mean(&points)
}

/// Mean of the chronologically last `sample_count` points.
///
/// Every tick in the window counts as a sample, even when several land in
/// the same nominal period; the oldest excess is dropped.
pub fn calculate_sma(
    mut points: Vec<PricePoint>,
    sample_count: usize,
) -> Result<Decimal, CalculationError> {
    if sample_count == 0 || points.len() < sample_count {
        return Err(CalculationError::Insufficient {
            required: sample_count,
            found: points.len(),
        });
    }

    sort_chronologically(&mut points);
    mean(&points[points.len() - sample_count..])
}
