//! Translation from evaluated prizes to the award records the platform
//! accounts with.
//!
//! Feature wins and risk wins land in different regulatory buckets, and a
//! round may carry at most one risk award. Gamble steps classify each
//! prize against its stake; an abort on the very first step still submits
//! a zero-amount cancel record so the ancillary game is formally
//! concluded rather than silently dropped.

use crate::errors::{EngineError, Result};
use crate::foundation::{AwardRecord, GambleResult, OutcomeList, ProgressiveAward};
use crate::logic::{GambleOutcome, LogicOutcome};

/// One base-play pass converted for submission.
#[derive(Clone, Debug)]
pub struct RoundOutcome {
    pub list: OutcomeList,
    /// Sum of non-risk winnings, the part that feeds the award meters.
    pub non_risk_total: i64,
    pub feature_index: u32,
}

fn checked_amount(amount: i64, what: &str) -> Result<u64> {
    u64::try_from(amount)
        .map_err(|_| EngineError::Logic(format!("negative {what} amount {amount}")))
}

/// Builds the award records for one evaluate pass.
///
/// More than one risk prize in a single pass is a fault in the game's
/// evaluation and aborts the round.
pub fn build_outcome_list(outcome: &LogicOutcome) -> Result<RoundOutcome> {
    let mut records = Vec::with_capacity(outcome.prizes.len());
    let mut non_risk_total = 0i64;
    let mut risk_seen = false;

    for prize in &outcome.prizes {
        if prize.risk_amount > 0 {
            if risk_seen {
                return Err(EngineError::Logic(format!(
                    "pass produced a second risk prize '{}'",
                    prize.name
                )));
            }
            risk_seen = true;
            records.push(AwardRecord::Risk {
                name: prize.name.clone(),
                amount: checked_amount(prize.amount, "risk prize")?,
                risk_amount: checked_amount(prize.risk_amount, "risk stake")?,
            });
        } else {
            let amount = checked_amount(prize.amount, "feature prize")?;
            non_risk_total += prize.amount;
            records.push(AwardRecord::Feature {
                feature_index: outcome.feature_index,
                name: prize.name.clone(),
                amount,
                progressive: prize
                    .progressive_level
                    .map(|level| ProgressiveAward { level, amount }),
            });
        }
    }

    Ok(RoundOutcome {
        list: OutcomeList::new(records),
        non_risk_total,
        feature_index: outcome.feature_index,
    })
}

/// One gamble step converted for submission.
#[derive(Clone, Debug)]
pub enum GambleSubmission {
    /// The step resolved; `win_total` feeds the award meters.
    Resolved { list: OutcomeList, win_total: i64 },
    /// The player backed out. Carries the cancel record on the first
    /// step and nothing on later ones, where earlier steps already
    /// account for the game.
    Aborted { list: OutcomeList },
}

impl GambleSubmission {
    pub fn list(&self) -> &OutcomeList {
        match self {
            GambleSubmission::Resolved { list, .. } => list,
            GambleSubmission::Aborted { list } => list,
        }
    }
}

/// Builds the ancillary award records for one gamble step.
pub fn build_gamble_list(outcome: &GambleOutcome, first: bool) -> Result<GambleSubmission> {
    if outcome.aborted {
        let records = if first {
            vec![AwardRecord::Ancillary {
                result: GambleResult::Cancel,
                amount: 0,
                risk_amount: 0,
            }]
        } else {
            vec![]
        };
        return Ok(GambleSubmission::Aborted {
            list: OutcomeList::new(records),
        });
    }

    let mut records = Vec::with_capacity(outcome.prizes.len());
    let mut win_total = 0i64;
    for prize in &outcome.prizes {
        let amount = checked_amount(prize.amount, "gamble prize")?;
        let risk_amount = checked_amount(prize.risk_amount, "gamble stake")?;
        let result = match amount.cmp(&risk_amount) {
            std::cmp::Ordering::Greater => GambleResult::Win,
            std::cmp::Ordering::Equal => GambleResult::Tie,
            std::cmp::Ordering::Less => GambleResult::Loss,
        };
        win_total += prize.amount;
        records.push(AwardRecord::Ancillary {
            result,
            amount,
            risk_amount,
        });
    }

    Ok(GambleSubmission::Resolved {
        list: OutcomeList::new(records),
        win_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::{GamblePrize, Prize};

    fn risk_prize(name: &str, amount: i64, risk: i64) -> Prize {
        Prize {
            name: name.into(),
            amount,
            risk_amount: risk,
            progressive_level: None,
        }
    }

    #[test]
    fn features_and_one_risk_prize_coexist() {
        let outcome = LogicOutcome {
            prizes: vec![
                Prize::new("line 3", 40),
                risk_prize("bonus wheel", 200, 40),
                Prize::new("scatter", 10),
            ],
            is_final: true,
            feature_index: 2,
        };
        let round = build_outcome_list(&outcome).unwrap();
        assert_eq!(round.non_risk_total, 50);
        assert_eq!(round.feature_index, 2);
        assert_eq!(round.list.records.len(), 3);
        assert!(matches!(
            round.list.records[1],
            AwardRecord::Risk {
                amount: 200,
                risk_amount: 40,
                ..
            }
        ));
    }

    #[test]
    fn second_risk_prize_is_fatal() {
        let outcome = LogicOutcome {
            prizes: vec![risk_prize("a", 10, 5), risk_prize("b", 10, 5)],
            is_final: true,
            feature_index: 0,
        };
        let err = build_outcome_list(&outcome).unwrap_err();
        assert!(err.to_string().contains("second risk prize"));
    }

    #[test]
    fn progressive_prizes_carry_a_sub_record() {
        let outcome = LogicOutcome {
            prizes: vec![Prize {
                name: "grand".into(),
                amount: 5000,
                risk_amount: 0,
                progressive_level: Some(1),
            }],
            is_final: true,
            feature_index: 0,
        };
        let round = build_outcome_list(&outcome).unwrap();
        assert!(matches!(
            round.list.records[0],
            AwardRecord::Feature {
                progressive: Some(ProgressiveAward { level: 1, amount: 5000 }),
                ..
            }
        ));
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let outcome = LogicOutcome {
            prizes: vec![Prize::new("broken", -1)],
            is_final: true,
            feature_index: 0,
        };
        assert!(build_outcome_list(&outcome).is_err());
    }

    #[test]
    fn gamble_steps_classify_against_the_stake() {
        let win = GambleOutcome {
            prizes: vec![GamblePrize {
                name: "double".into(),
                amount: 100,
                risk_amount: 50,
            }],
            is_final: false,
            aborted: false,
        };
        match build_gamble_list(&win, true).unwrap() {
            GambleSubmission::Resolved { list, win_total } => {
                assert_eq!(win_total, 100);
                assert!(matches!(
                    list.records[0],
                    AwardRecord::Ancillary {
                        result: GambleResult::Win,
                        ..
                    }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }

        let tie = GambleOutcome {
            prizes: vec![GamblePrize {
                name: "push".into(),
                amount: 50,
                risk_amount: 50,
            }],
            is_final: true,
            aborted: false,
        };
        assert!(matches!(
            build_gamble_list(&tie, false).unwrap().list().records[0],
            AwardRecord::Ancillary {
                result: GambleResult::Tie,
                ..
            }
        ));

        let loss = GambleOutcome {
            prizes: vec![GamblePrize {
                name: "bust".into(),
                amount: 0,
                risk_amount: 50,
            }],
            is_final: true,
            aborted: false,
        };
        assert!(matches!(
            build_gamble_list(&loss, false).unwrap().list().records[0],
            AwardRecord::Ancillary {
                result: GambleResult::Loss,
                ..
            }
        ));
    }

    #[test]
    fn first_step_abort_submits_a_cancel_record() {
        let abort = GambleOutcome {
            prizes: vec![],
            is_final: true,
            aborted: true,
        };
        match build_gamble_list(&abort, true).unwrap() {
            GambleSubmission::Aborted { list } => {
                assert_eq!(
                    list.records,
                    vec![AwardRecord::Ancillary {
                        result: GambleResult::Cancel,
                        amount: 0,
                        risk_amount: 0,
                    }]
                );
            }
            other => panic!("unexpected {other:?}"),
        }

        // A later-step abort needs no record; prior steps already account
        // for the game.
        match build_gamble_list(&abort, false).unwrap() {
            GambleSubmission::Aborted { list } => assert!(list.records.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
