use crate::client::{MODEL_HAIKU, MODEL_OPUS, MODEL_SONNET};

/// Per-million-token prices in USD: (input, output).
///
/// Unknown model IDs fall back to Sonnet pricing.
fn prices_for(model: &str) -> (f64, f64) {
    match model {
        MODEL_OPUS => (15.0, 75.0),
        MODEL_SONNET => (3.0, 15.0),
        MODEL_HAIKU => (0.25, 1.25),
        _ => (3.0, 15.0),
    }
}

pub fn cost_usd(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let (p_in, p_out) = prices_for(model);
    (input_tokens as f64 / 1_000_000.0) * p_in + (output_tokens as f64 / 1_000_000.0) * p_out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opus_pricing() {
        // 1M in + 1M out at 15/75
        assert!((cost_usd(MODEL_OPUS, 1_000_000, 1_000_000) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn sonnet_pricing() {
        let cost = cost_usd(MODEL_SONNET, 1000, 500);
        // 1000/1M*3 + 500/1M*15 = 0.003 + 0.0075
        assert!((cost - 0.0105).abs() < 1e-9);
    }

    #[test]
    fn haiku_pricing() {
        let cost = cost_usd(MODEL_HAIKU, 2_000_000, 0);
        assert!((cost - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_sonnet_prices() {
        assert_eq!(
            cost_usd("experimental-model", 1000, 500),
            cost_usd(MODEL_SONNET, 1000, 500)
        );
    }

    #[test]
    fn zero_tokens_zero_cost() {
        assert_eq!(cost_usd(MODEL_OPUS, 0, 0), 0.0);
    }
}
