use mapper_types::{ScalarType, Timetag, Vector};

/// One sample in a ring: a typed vector, its timetag, and whether the slot
/// has ever actually been written (a freshly-reset or freshly-allocated slot
/// reads back as `None` rather than as a sample of zeros).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: Vector,
    pub time: Timetag,
    pub has_value: bool,
}

impl Sample {
    pub fn empty(ty: ScalarType, vec_len: usize) -> Self {
        Sample {
            value: Vector::zeros(ty, vec_len),
            time: Timetag::ZERO,
            has_value: false,
        }
    }
}
