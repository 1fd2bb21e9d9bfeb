//! Signal Fuser (C3).
//!
//! Deterministic combination of technical confidence and an optional LLM
//! opinion into one `(direction, confidence, agreement)` triple, per the
//! algorithm contract in the specification. Grounded in the teacher's
//! `agents::zero_loss_enforcer` style of combining independent assessments
//! into one approval decision, but implements the exact fusion rule the
//! specification pins down (the teacher's weighting is heuristic; this is
//! not).

use crate::indicators::Direction;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionRecord {
    pub direction: Direction,
    pub confidence: f64,
    pub agreement: bool,
    pub base_confidence: f64,
    pub skipped_llm: bool,
}

/// Fuses a technical (direction, confidence) with an optional LLM
/// (direction, confidence) pair weighted by `llm_weight` in [0, 1].
pub fn fuse(
    tech_direction: Direction,
    tech_confidence: f64,
    llm: Option<(Direction, f64)>,
    llm_weight: f64,
) -> FusionRecord {
    let Some((llm_direction, llm_confidence)) = llm else {
        return FusionRecord {
            direction: tech_direction,
            confidence: tech_confidence.clamp(0.0, 100.0),
            agreement: false,
            base_confidence: tech_confidence,
            skipped_llm: true,
        };
    };

    let llm_directional_conf = match llm_direction {
        Direction::Neutral => 0.0,
        _ => llm_confidence,
    };
    let base = tech_confidence * (1.0 - llm_weight) + llm_directional_conf * llm_weight;

    let both_non_neutral = !matches!(tech_direction, Direction::Neutral) && !matches!(llm_direction, Direction::Neutral);
    let agree = both_non_neutral && same_direction(tech_direction, llm_direction);
    let conflict = both_non_neutral && !agree;

    let adjusted = if agree {
        base + 10.0
    } else if conflict {
        base - 15.0
    } else {
        base
    };
    let confidence = adjusted.clamp(0.0, 100.0);

    let direction = if agree {
        tech_direction
    } else if matches!(tech_direction, Direction::Neutral) && !matches!(llm_direction, Direction::Neutral) {
        llm_direction
    } else if matches!(llm_direction, Direction::Neutral) && !matches!(tech_direction, Direction::Neutral) {
        tech_direction
    } else if conflict {
        if tech_confidence >= llm_confidence {
            tech_direction
        } else {
            llm_direction
        }
    } else {
        Direction::Neutral
    };

    FusionRecord {
        direction,
        confidence,
        agreement: agree,
        base_confidence: base,
        skipped_llm: false,
    }
}

fn same_direction(a: Direction, b: Direction) -> bool {
    matches!(
        (a, b),
        (Direction::Long, Direction::Long) | (Direction::Short, Direction::Short)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_llm_input_returns_technical_only() {
        let record = fuse(Direction::Long, 60.0, None, 0.4);
        assert_eq!(record.direction, Direction::Long);
        assert_eq!(record.confidence, 60.0);
        assert!(!record.agreement);
        assert!(record.skipped_llm);
    }

    #[test]
    fn agreement_adds_ten_points() {
        let record = fuse(Direction::Long, 70.0, Some((Direction::Long, 70.0)), 0.5);
        assert!(record.agreement);
        assert_eq!(record.confidence, 80.0);
        assert_eq!(record.direction, Direction::Long);
    }

    #[test]
    fn conflict_subtracts_fifteen_points() {
        // base = 60*0.6 + 75*0.4 = 66; conflict -15 => 51
        let record = fuse(Direction::Long, 60.0, Some((Direction::Short, 75.0)), 0.4);
        assert!((record.base_confidence - 66.0).abs() < 1e-9);
        assert!((record.confidence - 51.0).abs() < 1e-9);
        assert_eq!(record.direction, Direction::Short); // higher raw confidence wins
    }

    #[test]
    fn one_sided_neutral_uses_the_non_neutral_side() {
        let record = fuse(Direction::Neutral, 0.0, Some((Direction::Short, 65.0)), 0.5);
        assert_eq!(record.direction, Direction::Short);
    }

    #[test]
    fn confidence_clamped_to_one_hundred() {
        let record = fuse(Direction::Long, 95.0, Some((Direction::Long, 95.0)), 0.5);
        assert_eq!(record.confidence, 100.0);
    }
}
