use atelier_core::{Directive, Repo, SourceLens};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Weighted lens selection for the PM role.
///
/// Overrides first: an urgent (high/critical) directive forces the
/// `directive` lens 60% of the time; failing that, coverage below 60% forces
/// `code` 40% of the time. Otherwise the base distribution applies:
/// market 0.30, expansion 0.30, persona 0.20, code 0.20.
///
/// The RNG is owned so tests can seed it and assert exact draws.
pub struct LensPicker {
    rng: StdRng,
}

impl LensPicker {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn pick(&mut self, repo: &Repo, directives: &[Directive]) -> SourceLens {
        if directives.iter().any(|d| d.is_urgent()) && self.rng.gen::<f64>() < 0.6 {
            return SourceLens::Directive;
        }

        if repo.has_low_coverage() && self.rng.gen::<f64>() < 0.4 {
            return SourceLens::Code;
        }

        let r: f64 = self.rng.gen();
        if r < 0.30 {
            SourceLens::Market
        } else if r < 0.60 {
            SourceLens::Expansion
        } else if r < 0.80 {
            SourceLens::Persona
        } else {
            SourceLens::Code
        }
    }
}

impl Default for LensPicker {
    fn default() -> Self {
        Self::new()
    }
}
