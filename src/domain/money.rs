use std::fmt;

/// Format a USD amount with two decimals.
/// Example: 900.0 -> "900.00", 1234.5 -> "1234.50"
pub fn format_usd(amount: f64) -> String {
    format!("{:.2}", amount)
}

/// Format an asset quantity with eight decimals.
/// Example: 2.0 -> "2.00000000"
pub fn format_asset(quantity: f64) -> String {
    format!("{:.8}", quantity)
}

/// Parse a user-supplied amount. Only finite, strictly positive values are
/// accepted.
/// Example: "100" -> 100.0, "0.5" -> 0.5, "-3" -> error
pub fn parse_amount(input: &str) -> Result<f64, ParseAmountError> {
    let value: f64 = input
        .trim()
        .parse()
        .map_err(|_| ParseAmountError::InvalidFormat)?;
    if !value.is_finite() {
        return Err(ParseAmountError::InvalidFormat);
    }
    if value <= 0.0 {
        return Err(ParseAmountError::NotPositive);
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    InvalidFormat,
    NotPositive,
}

impl fmt::Display for ParseAmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseAmountError::InvalidFormat => write!(f, "invalid amount format"),
            ParseAmountError::NotPositive => write!(f, "amount must be positive"),
        }
    }
}

impl std::error::Error for ParseAmountError {}
