/// Per-phase value triple in fixed L1, L2, L3 order.
///
/// The order matches the register layout on both serial links, so index 0
/// always refers to L1 regardless of which quantity (W, VA, VAr, power
/// factor) the set carries.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseSet([f64; 3]);

/// Phase names in index order, for log and error messages.
pub const PHASE_LABELS: [&str; 3] = ["L1", "L2", "L3"];

impl PhaseSet {
    pub const fn new(l1: f64, l2: f64, l3: f64) -> Self {
        Self([l1, l2, l3])
    }

    /// The same value on all three phases.
    pub const fn balanced(value: f64) -> Self {
        Self([value; 3])
    }

    pub fn l1(&self) -> f64 {
        self.0[0]
    }

    pub fn l2(&self) -> f64 {
        self.0[1]
    }

    pub fn l3(&self) -> f64 {
        self.0[2]
    }

    /// Sum over all three phases.
    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn values(&self) -> [f64; 3] {
        self.0
    }
}

impl From<[f64; 3]> for PhaseSet {
    fn from(values: [f64; 3]) -> Self {
        Self(values)
    }
}
