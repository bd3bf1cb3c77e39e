use std::fmt::{Display, Formatter};

use tether_error::{TetherResult, tether_bail};

/// Largest precision representable in 128 bits.
pub const DECIMAL128_MAX_PRECISION: u8 = 38;

/// Parameters that define the precision and scale of a decimal type.
///
/// Values are stored as 128-bit two's complement integers scaled by `10^scale`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DecimalDType {
    precision: u8,
    scale: i8,
}

impl DecimalDType {
    /// Checked constructor for a `DecimalDType`.
    pub fn try_new(precision: u8, scale: i8) -> TetherResult<Self> {
        if precision == 0 || precision > DECIMAL128_MAX_PRECISION {
            tether_bail!(
                "decimal precision {} outside 1..={}",
                precision,
                DECIMAL128_MAX_PRECISION
            );
        }
        if scale.unsigned_abs() > precision {
            tether_bail!("decimal scale {} exceeds precision {}", scale, precision);
        }
        Ok(Self { precision, scale })
    }

    /// The precision is the number of significant figures that the decimal tracks.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// The scale is the maximum number of digits relative to the decimal point.
    pub fn scale(&self) -> i8 {
        self.scale
    }
}

impl Display for DecimalDType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "decimal({},{})", self.precision, self.scale)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0)]
    #[case(39, 2)]
    #[case(10, 11)]
    fn invalid(#[case] precision: u8, #[case] scale: i8) {
        assert!(DecimalDType::try_new(precision, scale).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(DecimalDType::try_new(12, 3).unwrap().to_string(), "decimal(12,3)");
    }
}
