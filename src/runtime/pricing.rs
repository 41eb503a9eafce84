use crate::error::AppError;
use crate::models::usage::CanonicalUsage;
use bigdecimal::{BigDecimal, Zero};
use serde_json::Value;
use std::str::FromStr;

const MAX_TOKENS: u64 = 1_000_000_000;
const MIN_PRICE: &str = "0.000001";
const MAX_PRICE: i64 = 1000;

trait CheckedBigDecimal {
    fn checked_add(&self, other: &Self) -> Option<Self>
    where
        Self: Sized;
    fn checked_mul(&self, other: &Self) -> Option<Self>
    where
        Self: Sized;
    fn checked_div(&self, other: &Self) -> Option<Self>
    where
        Self: Sized;
}

impl CheckedBigDecimal for BigDecimal {
    fn checked_add(&self, other: &Self) -> Option<Self> {
        let result = self + other;
        if result.to_string().len() > 100 { None } else { Some(result) }
    }

    fn checked_mul(&self, other: &Self) -> Option<Self> {
        let result = self * other;
        if result.to_string().len() > 100 { None } else { Some(result) }
    }

    fn checked_div(&self, other: &Self) -> Option<Self> {
        if other.is_zero() {
            None
        } else {
            let result = self / other;
            if result.to_string().len() > 100 { None } else { Some(result) }
        }
    }
}

/// Cost calculation for a model's token usage, driven by a JSON pricing
/// schema rather than per-provider code. Implementors supply the schema;
/// `cost` does the arithmetic, with checked operations throughout so a
/// malformed rate can't panic the calling request.
pub trait PricingCalculator {
    fn pricing_info(&self) -> &Value;

    fn cost(&self, usage: &CanonicalUsage) -> Result<BigDecimal, AppError> {
        let pricing_info = self.pricing_info();
        let million = BigDecimal::from(1_000_000);
        let min_price = BigDecimal::from_str(MIN_PRICE)
            .map_err(|e| AppError::Internal(format!("failed to parse minimum price: {}", e)))?;
        let max_price = BigDecimal::from(MAX_PRICE);

        validate_token_count(usage.prompt_tokens, "prompt")?;
        validate_token_count(usage.completion_tokens, "completion")?;
        validate_token_count(usage.cache_read_tokens, "cache_read")?;
        validate_token_count(usage.cache_write_tokens, "cache_write")?;

        let input_rate = parse_pricing_field(pricing_info, "input_per_million", &min_price, &max_price)?;
        let output_rate = parse_pricing_field(pricing_info, "output_per_million", &min_price, &max_price)?;

        let mut total_cost = BigDecimal::from(0);

        let base_input_tokens = usage
            .prompt_tokens
            .checked_sub(usage.cache_write_tokens)
            .and_then(|v| v.checked_sub(usage.cache_read_tokens))
            .ok_or_else(|| {
                AppError::Validation("cache tokens exceed prompt tokens".to_string())
            })?;

        if base_input_tokens > 0 {
            let input_cost = calculate_token_cost(base_input_tokens, &input_rate, &million, &max_price)?;
            total_cost = total_cost
                .checked_add(&input_cost)
                .ok_or_else(|| AppError::Internal("cost overflow computing input cost".to_string()))?;
        }

        if usage.cache_write_tokens > 0 {
            let rate = parse_pricing_field(pricing_info, "cache_write_per_million", &min_price, &max_price)
                .unwrap_or_else(|_| input_rate.clone());
            let cost = calculate_token_cost(usage.cache_write_tokens, &rate, &million, &max_price)?;
            total_cost = total_cost
                .checked_add(&cost)
                .ok_or_else(|| AppError::Internal("cost overflow computing cache write cost".to_string()))?;
        }

        if usage.cache_read_tokens > 0 {
            let rate = parse_pricing_field(pricing_info, "cache_read_per_million", &min_price, &max_price)
                .unwrap_or_else(|_| input_rate.clone());
            let cost = calculate_token_cost(usage.cache_read_tokens, &rate, &million, &max_price)?;
            total_cost = total_cost
                .checked_add(&cost)
                .ok_or_else(|| AppError::Internal("cost overflow computing cache read cost".to_string()))?;
        }

        if usage.completion_tokens > 0 {
            let cost = calculate_token_cost(usage.completion_tokens, &output_rate, &million, &max_price)?;
            total_cost = total_cost
                .checked_add(&cost)
                .ok_or_else(|| AppError::Internal("cost overflow computing output cost".to_string()))?;
        }

        if total_cost > max_price {
            return Err(AppError::Internal(
                "total cost calculation exceeds maximum allowed cost".to_string(),
            ));
        }

        Ok(total_cost)
    }

    /// Human-readable description for admin/debug surfaces.
    fn cache_debug(&self) -> String {
        let pricing_info = self.pricing_info();
        if pricing_info.get("input_per_million").is_some()
            && pricing_info.get("output_per_million").is_some()
        {
            "token-based pricing configured".to_string()
        } else {
            "no pricing configured".to_string()
        }
    }
}

/// Pricing schema loaded once at startup and held for the process lifetime.
/// Where that schema comes from (a database table, a vendor price list) is
/// out of scope here; this just holds whatever JSON it's handed.
pub struct StaticPricing(Value);

impl StaticPricing {
    pub fn new(pricing_info: Value) -> Self {
        Self(pricing_info)
    }

    /// Reads `PRICING_SCHEMA_JSON` from the environment, falling back to an
    /// empty schema (every `cost` call then fails closed and logs rather
    /// than panicking).
    pub fn from_env() -> Self {
        let raw = std::env::var("PRICING_SCHEMA_JSON").unwrap_or_else(|_| "{}".to_string());
        let pricing_info = serde_json::from_str(&raw).unwrap_or_else(|_| Value::Object(Default::default()));
        Self(pricing_info)
    }
}

impl PricingCalculator for StaticPricing {
    fn pricing_info(&self) -> &Value {
        &self.0
    }
}

fn parse_pricing_field(
    pricing_info: &Value,
    key: &str,
    min_price: &BigDecimal,
    max_price: &BigDecimal,
) -> Result<BigDecimal, AppError> {
    let price = pricing_info
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| AppError::Validation(format!("missing or invalid {} in pricing info", key)))?;

    let price_bd = BigDecimal::from_str(&price.to_string())
        .map_err(|e| AppError::Validation(format!("failed to parse {} as decimal: {}", key, e)))?;

    if price_bd < *min_price || price_bd > *max_price {
        return Err(AppError::Validation(format!(
            "{} pricing rate {} is outside allowed bounds",
            key, price_bd
        )));
    }

    Ok(price_bd)
}

fn calculate_token_cost(
    token_count: u64,
    rate: &BigDecimal,
    million: &BigDecimal,
    max_price: &BigDecimal,
) -> Result<BigDecimal, AppError> {
    if token_count > MAX_TOKENS {
        return Err(AppError::Validation(format!(
            "token count {} exceeds maximum allowed {}",
            token_count, MAX_TOKENS
        )));
    }

    let tokens_bd = BigDecimal::from(token_count);
    let product = rate
        .checked_mul(&tokens_bd)
        .ok_or_else(|| AppError::Internal("token cost multiplication overflow".to_string()))?;

    let max_allowed = max_price
        .checked_mul(million)
        .ok_or_else(|| AppError::Internal("maximum price calculation overflow".to_string()))?;

    if product > max_allowed {
        return Err(AppError::Internal(
            "token cost calculation would overflow maximum allowed cost".to_string(),
        ));
    }

    product
        .checked_div(million)
        .ok_or_else(|| AppError::Internal("token cost division error".to_string()))
}

fn validate_token_count(token_count: u64, context: &str) -> Result<(), AppError> {
    if token_count > MAX_TOKENS {
        return Err(AppError::Validation(format!(
            "invalid {} token count: {}, must be at most {}",
            context, token_count, MAX_TOKENS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedPricing(Value);

    impl PricingCalculator for FixedPricing {
        fn pricing_info(&self) -> &Value {
            &self.0
        }
    }

    #[test]
    fn computes_simple_cost() {
        let calc = FixedPricing(json!({
            "input_per_million": 0.5,
            "output_per_million": 1.5,
        }));
        let usage = CanonicalUsage {
            prompt_tokens: 1000,
            completion_tokens: 500,
            ..Default::default()
        };
        let cost = calc.cost(&usage).unwrap();
        assert_eq!(cost, BigDecimal::from_str("0.00125").unwrap());
    }

    #[test]
    fn rejects_cache_tokens_exceeding_prompt() {
        let calc = FixedPricing(json!({
            "input_per_million": 1.0,
            "output_per_million": 2.0,
        }));
        let usage = CanonicalUsage {
            prompt_tokens: 100,
            completion_tokens: 10,
            cache_read_tokens: 200,
            cache_write_tokens: 0,
        };
        assert!(calc.cost(&usage).is_err());
    }
}
