//! Installment due dates.

use chrono::{Months, NaiveDate};

use super::ensure_period_in_range;
use crate::error::{ArithmeticError, Result};
use crate::model::Chit;

/// Due date of `period`: the chit's start date plus `period - 1` months.
/// Days past the end of a shorter month clamp to its last day.
pub fn due_date(chit: &Chit, period: u32) -> Result<NaiveDate> {
    ensure_period_in_range(chit, period)?;
    chit.start_date
        .checked_add_months(Months::new(period - 1))
        .ok_or_else(|| ArithmeticError::Overflow("due date").into())
}
