use crate::error::AppError;
use std::time::Duration;

/// Parses the gateway's duration grammar: an integer followed by one of
/// `s m h d w M Y` (seconds, minutes, hours, days, weeks, months, years).
/// Calendar units use fixed conversions rather than real calendar arithmetic:
/// `d=24h`, `w=7d`, `M=30d`, `Y=365d`.
pub struct GatewayDuration;

impl GatewayDuration {
    pub fn parse(input: &str) -> Result<Duration, AppError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AppError::Validation("duration string is empty".to_string()));
        }

        let (number_part, unit) = input.split_at(input.len() - 1);
        let amount: u64 = number_part.parse().map_err(|_| {
            AppError::Validation(format!("invalid duration magnitude in '{}'", input))
        })?;

        let seconds = match unit {
            "s" => amount,
            "m" => amount * 60,
            "h" => amount * 60 * 60,
            "d" => amount * 24 * 60 * 60,
            "w" => amount * 7 * 24 * 60 * 60,
            "M" => amount * 30 * 24 * 60 * 60,
            "Y" => amount * 365 * 24 * 60 * 60,
            other => {
                return Err(AppError::Validation(format!(
                    "unrecognized duration unit '{}' in '{}'",
                    other, input
                )));
            }
        };

        Ok(Duration::from_secs(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(GatewayDuration::parse("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(GatewayDuration::parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(GatewayDuration::parse("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(GatewayDuration::parse("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(GatewayDuration::parse("1w").unwrap(), Duration::from_secs(7 * 86400));
        assert_eq!(GatewayDuration::parse("1M").unwrap(), Duration::from_secs(30 * 86400));
        assert_eq!(GatewayDuration::parse("1Y").unwrap(), Duration::from_secs(365 * 86400));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(GatewayDuration::parse("10x").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(GatewayDuration::parse("").is_err());
    }
}
