use serde::Serialize;
use std::ops::{Add, AddAssign};

/// Potential energy split by origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EnergyTerm {
    /// Coarse-grained pair energy, already scaled by `1 - w` for blended pairs.
    pub coarse: f64,
    /// Atomistic pair energy, already scaled by `w` for blended pairs.
    pub atomistic: f64,
    pub bonded: f64,
    /// Free-energy compensation.
    pub compensation: f64,
}

impl EnergyTerm {
    pub fn new(coarse: f64, atomistic: f64, bonded: f64, compensation: f64) -> Self {
        Self {
            coarse,
            atomistic,
            bonded,
            compensation,
        }
    }

    #[inline]
    pub fn total(&self) -> f64 {
        self.coarse + self.atomistic + self.bonded + self.compensation
    }
}

impl Add for EnergyTerm {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            coarse: self.coarse + rhs.coarse,
            atomistic: self.atomistic + rhs.atomistic,
            bonded: self.bonded + rhs.bonded,
            compensation: self.compensation + rhs.compensation,
        }
    }
}

impl AddAssign for EnergyTerm {
    fn add_assign(&mut self, rhs: Self) {
        self.coarse += rhs.coarse;
        self.atomistic += rhs.atomistic;
        self.bonded += rhs.bonded;
        self.compensation += rhs.compensation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_returns_sum_of_all_terms() {
        let term = EnergyTerm::new(1.5, -2.0, 0.25, 0.25);
        assert_eq!(term.total(), 0.0);
    }

    #[test]
    fn add_sums_each_field_correctly() {
        let a = EnergyTerm::new(1.0, 2.0, 3.0, 4.0);
        let b = EnergyTerm::new(4.0, 5.0, 6.0, 7.0);
        assert_eq!(a + b, EnergyTerm::new(5.0, 7.0, 9.0, 11.0));
    }

    #[test]
    fn add_assign_accumulates_each_field_correctly() {
        let mut a = EnergyTerm::new(1.0, 2.0, 3.0, 4.0);
        a += EnergyTerm::new(-1.0, -2.0, 0.0, 1.0);
        assert_eq!(a, EnergyTerm::new(0.0, 0.0, 3.0, 5.0));
    }

    #[test]
    fn default_initializes_all_fields_to_zero() {
        assert_eq!(EnergyTerm::default().total(), 0.0);
    }
}
