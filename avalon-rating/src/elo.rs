/// Every rated battle's K-factor, per `spec.md` §4.5.
pub const K_FACTOR: f64 = 100.0;

/// Token budget above which a player's call volume no longer increases their score multiplier.
pub const MAX_TOKEN_ALLOWED: f64 = 3000.0;

/// The harmonic mean of a team's ELOs: `n / Σ(1/elo_i)`, per the glossary's "Harmonic team ELO".
/// A single very weak teammate drags this down far harder than an arithmetic mean would, which
/// is the point: a 7-player mission team is only as strong as its weakest link.
pub fn harmonic_mean(elos: &[i64]) -> f64 {
    let n = elos.len() as f64;
    let reciprocal_sum: f64 = elos.iter().map(|&elo| 1.0 / elo as f64).sum();
    n / reciprocal_sum
}

/// The arithmetic mean of a team's ELOs, used only for the error path's team-difference term.
pub fn arithmetic_mean(elos: &[i64]) -> f64 {
    elos.iter().sum::<i64>() as f64 / elos.len() as f64
}

/// The standard Elo expected-score formula for a side of strength `a` facing a side of strength
/// `b`.
pub fn expected_score(a: f64, b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((b - a) / 400.0))
}

/// A player's token-weighted activity for one battle: `(input + 3·output) / 4`, per `spec.md`
/// §4.5. Output tokens count three times as much as input, since they better reflect how much
/// the bot actually relied on the model rather than just forwarding a long prompt.
pub fn weighted_tokens(prompt_tokens: u64, completion_tokens: u64) -> f64 {
    (prompt_tokens as f64 + 3.0 * completion_tokens as f64) / 4.0
}

/// The per-player score multiplier `m(p) = 0.9 + max(proportion − 1, 0) / 3`, where `proportion`
/// is `p`'s weighted token usage divided by the larger of [`MAX_TOKEN_ALLOWED`] and the 7-player
/// mean weighted usage. Usage at or below that denominator earns the floor multiplier of 0.9;
/// usage above it earns a bonus, capped by the `/3`.
pub fn token_multiplier(player_weighted: f64, table_mean_weighted: f64) -> f64 {
    let denominator = MAX_TOKEN_ALLOWED.max(table_mean_weighted);
    let proportion = if denominator > 0.0 {
        player_weighted / denominator
    } else {
        0.0
    };
    0.9 + (proportion - 1.0).max(0.0) / 3.0
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn harmonic_mean_punishes_a_weak_teammate_more_than_arithmetic_mean_does() {
        let elos = [1200, 1200, 400];
        let harmonic = harmonic_mean(&elos);
        let arithmetic = arithmetic_mean(&elos);
        assert!(harmonic < arithmetic, "{harmonic} should be < {arithmetic}");
    }

    #[test]
    fn harmonic_mean_of_equal_elos_is_that_elo() {
        assert_eq!(harmonic_mean(&[1000, 1000, 1000]), 1000.0);
    }

    #[test]
    fn expected_score_is_one_half_for_equal_strength() {
        assert_eq!(expected_score(1000.0, 1000.0), 0.5);
    }

    #[test]
    fn expected_score_favors_the_stronger_side() {
        assert!(expected_score(1400.0, 1000.0) > 0.5);
        assert!(expected_score(1000.0, 1400.0) < 0.5);
    }

    #[test]
    fn token_multiplier_is_floor_at_or_below_the_table_mean() {
        assert_eq!(token_multiplier(100.0, 500.0), 0.9);
        assert_eq!(token_multiplier(500.0, 500.0), 0.9);
    }

    #[test]
    fn token_multiplier_rewards_usage_above_the_cap() {
        // Weighted usage of 2x MAX_TOKEN_ALLOWED: proportion = 2, bonus = (2-1)/3.
        let m = token_multiplier(MAX_TOKEN_ALLOWED * 2.0, 100.0);
        assert_eq!(m, 0.9 + 1.0 / 3.0);
    }
}
