use std::collections::BTreeMap;

use avalon_data::Role;
use avalon_prng::RealPseudoRandomNumberGenerator;

/// A deterministic, seeded PRNG for tests that need reproducible shuffles or samples without
/// caring about the exact seed value.
pub fn seeded_prng(seed: u64) -> RealPseudoRandomNumberGenerator {
    RealPseudoRandomNumberGenerator::new(Some(seed))
}

/// The fixed 7-role table assigned to positions `1..=7` in table order (Merlin, Percival, two
/// Knights, Morgana, Assassin, Oberon), per `spec.md` §4.4's role table.
///
/// Most scenario tests don't care which position holds which role, only that the table is
/// internally consistent; this sidesteps having to shuffle with a real PRNG for every test.
pub fn seven_roles() -> BTreeMap<u8, Role> {
    Role::table()
        .into_iter()
        .enumerate()
        .map(|(i, role)| (i as u8 + 1, role))
        .collect()
}

#[cfg(test)]
mod tests {
    use avalon_prng::PseudoRandomNumberGenerator;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn seven_roles_covers_every_position_once() {
        let roles = seven_roles();
        assert_eq!(roles.len(), 7);
        assert_eq!(roles.keys().copied().collect::<Vec<_>>(), (1u8..=7).collect::<Vec<_>>());
    }

    #[test]
    fn seeded_prng_is_reproducible() {
        let mut a = seeded_prng(42);
        let mut b = seeded_prng(42);
        for _ in 0..10 {
            assert_eq!(a.next(), b.next());
        }
    }
}
