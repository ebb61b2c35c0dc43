//! Parameter space definition such as bound constraints for calibrated
//! parameters.

use std::iter::FromIterator;

use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;

/// Domain of a calibration problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl Domain {
    /// Creates unconstrained domain with given dimension.
    pub fn unconstrained(dim: usize) -> Self {
        assert!(dim > 0, "empty domain");

        Self {
            lower: DVector::from_element(dim, f64::NEG_INFINITY),
            upper: DVector::from_element(dim, f64::INFINITY),
        }
    }

    /// Creates rectangular domain with given bounds.
    ///
    /// Positive and negative infinity can be used to indicate value unbounded
    /// in that dimension and direction. If the entire domain is unconstrained,
    /// use [`Domain::unconstrained`] instead.
    pub fn rect(lower: DVector<f64>, upper: DVector<f64>) -> Self {
        assert!(
            lower.nrows() == upper.nrows(),
            "lower and upper have different size"
        );
        assert!(lower.nrows() > 0, "empty domain");
        assert!(
            lower.iter().zip(upper.iter()).all(|(l, u)| l <= u),
            "lower bound exceeds upper bound"
        );

        Self { lower, upper }
    }

    /// Gets the dimension of the domain.
    pub fn dim(&self) -> usize {
        self.lower.nrows()
    }

    /// Gets the lower bounds.
    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    /// Gets the upper bounds.
    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }

    /// Returns `true` if every parameter has finite lower and upper bound.
    pub fn is_bounded(&self) -> bool {
        self.lower
            .iter()
            .chain(self.upper.iter())
            .all(|bound| bound.is_finite())
    }

    /// Returns `true` if the point lies within the bounds.
    pub fn contains(&self, x: &DVector<f64>) -> bool {
        x.nrows() == self.dim()
            && x
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(xi, (li, ui))| li <= xi && xi <= ui)
    }

    /// Center of a bounded domain.
    pub fn center(&self) -> Option<DVector<f64>> {
        if self.is_bounded() {
            Some((&self.lower + &self.upper) * 0.5)
        } else {
            None
        }
    }

    /// Projects given point into the domain.
    pub fn project(&self, x: &mut DVector<f64>) -> bool {
        let mut not_feasible = false;

        self.lower
            .iter()
            .zip(self.upper.iter())
            .zip(x.iter_mut())
            .for_each(|((li, ui), xi)| {
                if *xi < *li {
                    *xi = *li;
                    not_feasible = true;
                } else if *xi > *ui {
                    *xi = *ui;
                    not_feasible = true;
                }
            });

        not_feasible
    }

    /// Projects given point into the domain in given dimension.
    pub fn project_in(&self, x: &mut DVector<f64>, i: usize) -> bool {
        let li = self.lower[i];
        let ui = self.upper[i];
        let xi = &mut x[i];

        if *xi < li {
            *xi = li;
            true
        } else if *xi > ui {
            *xi = ui;
            true
        } else {
            false
        }
    }

    /// Samples a point in the domain.
    ///
    /// Bounded dimensions are sampled uniformly. Dimensions with an infinite
    /// bound are sampled from the standard normal distribution, reflected at
    /// the finite bound if there is one.
    pub fn sample<R: Rng>(&self, x: &mut DVector<f64>, rng: &mut R) {
        x.iter_mut()
            .zip(self.lower.iter().copied().zip(self.upper.iter().copied()))
            .for_each(|(xi, (li, ui))| {
                *xi = if !li.is_finite() || !ui.is_finite() {
                    let random: f64 = rng.sample(StandardNormal);

                    if li.is_finite() || ui.is_finite() {
                        let clamped = random.max(li).min(ui);
                        let delta = clamped - random;
                        clamped + delta
                    } else {
                        random
                    }
                } else {
                    li + rng.gen::<f64>() * (ui - li)
                };
            });
    }
}

impl FromIterator<(f64, f64)> for Domain {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let (lower, upper): (Vec<_>, Vec<_>) = iter.into_iter().unzip();
        Self::rect(DVector::from_vec(lower), DVector::from_vec(upper))
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::dvector;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn sample_stays_within_bounds() {
        let dom: Domain = [(-2.0, 2.0), (0.5, 0.75), (3.0, 3.0)].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(3);
        let mut x = DVector::zeros(3);

        for _ in 0..1000 {
            dom.sample(&mut x, &mut rng);
            assert!(dom.contains(&x), "{:?} outside of the domain", x);
        }
    }

    #[test]
    fn sample_reflects_half_bounded() {
        let dom: Domain = [(0.0, f64::INFINITY)].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(3);
        let mut x = DVector::zeros(1);

        for _ in 0..1000 {
            dom.sample(&mut x, &mut rng);
            assert!(x[0] >= 0.0);
        }
    }

    #[test]
    fn project_clamps() {
        let dom: Domain = [(-1.0, 1.0), (-1.0, 1.0)].into_iter().collect();
        let mut x = dvector![3.0, 0.5];

        assert!(dom.project(&mut x));
        assert_eq!(x, dvector![1.0, 0.5]);
        assert!(!dom.project(&mut x));

        let mut y = dvector![0.0, -4.0];
        assert!(!dom.project_in(&mut y, 0));
        assert!(dom.project_in(&mut y, 1));
        assert_eq!(y, dvector![0.0, -1.0]);
    }

    #[test]
    fn center_of_bounded_only() {
        let dom: Domain = [(-1.0, 3.0), (0.0, 2.0)].into_iter().collect();
        assert_eq!(dom.center(), Some(dvector![1.0, 1.0]));
        assert!(Domain::unconstrained(2).center().is_none());
        assert!(!Domain::unconstrained(2).is_bounded());
    }
}
