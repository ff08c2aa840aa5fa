/// When a bisection is considered settled.
#[derive(Debug, Clone, Copy)]
pub enum Stop {
    /// Bracket narrower than the tolerance.
    Width(f64),
    /// Residual at the midpoint within the tolerance.
    Residual(f64),
}

#[derive(Debug, Clone, Copy)]
pub struct Bisection {
    pub midpoint: f64,
    pub lower: f64,
    pub upper: f64,
    pub iterations: u32,
    pub converged: bool,
}

/// Bisects `[lower, upper]` for a residual that is non-decreasing in its argument.
///
/// A negative residual moves the lower bound up, anything else moves the upper bound
/// down. When the iteration ceiling is hit first the last midpoint is still returned,
/// with `converged` left false.
pub fn bisect<F>(
    mut lower: f64,
    mut upper: f64,
    stop: Stop,
    max_iterations: u32,
    mut residual: F,
) -> Bisection
where
    F: FnMut(f64) -> f64,
{
    let mut midpoint = 0.5 * (lower + upper);
    let mut iterations = 0;

    let converged = loop {
        if let Stop::Width(tolerance) = stop {
            if upper - lower < tolerance {
                break true;
            }
        }

        midpoint = 0.5 * (lower + upper);
        let r = residual(midpoint);

        if let Stop::Residual(tolerance) = stop {
            if r.abs() <= tolerance {
                break true;
            }
        }
        if iterations >= max_iterations {
            break false;
        }

        if r < 0.0 {
            lower = midpoint;
        } else {
            upper = midpoint;
        }
        iterations += 1;
    };

    Bisection {
        midpoint,
        lower,
        upper,
        iterations,
        converged,
    }
}
