//! Team formation
//!
//! Splits a score-ordered window into two teams by snake interleaving: the
//! i-th lowest and i-th highest tickets are paired and pairs alternate between
//! team A and team B, so both the average and the spread of skill stay close.

use crate::types::Ticket;

/// Split an ascending window of `2N` tickets into two teams of `N`.
///
/// When the window length is not a multiple of four the interleave leaves
/// team A one pair heavy; the last ticket given to A is dropped and the middle
/// ticket of the window is appended to B instead. This tie-break decides which
/// player ends up on which side and is kept exactly as is.
pub fn form_teams(window: &[Ticket]) -> (Vec<Ticket>, Vec<Ticket>) {
    let len = window.len();
    let mid = len / 2;
    let mut team_a = Vec::with_capacity(mid + 1);
    let mut team_b = Vec::with_capacity(mid + 1);

    for i in 0..mid {
        let pair = [window[i].clone(), window[len - i - 1].clone()];
        if i % 2 == 0 {
            team_a.extend(pair);
        } else {
            team_b.extend(pair);
        }
    }

    if len % 4 != 0 && !team_a.is_empty() {
        team_a.pop();
        team_b.push(window[mid].clone());
    }

    (team_a, team_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn window(scores: &[f64]) -> Vec<Ticket> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| Ticket::new(format!("p{}", i), *s, ""))
            .collect()
    }

    fn ids(team: &[Ticket]) -> Vec<&str> {
        team.iter().map(|t| t.player_id.as_str()).collect()
    }

    #[test]
    fn test_one_versus_one() {
        let (a, b) = form_teams(&window(&[1000.0, 1010.0]));
        assert_eq!(ids(&a), vec!["p0"]);
        assert_eq!(ids(&b), vec!["p1"]);
    }

    #[test]
    fn test_two_versus_two_pairs_high_with_low() {
        let (a, b) = form_teams(&window(&[1000.0, 1100.0, 1200.0, 1300.0]));
        assert_eq!(ids(&a), vec!["p0", "p3"]);
        assert_eq!(ids(&b), vec!["p1", "p2"]);
    }

    #[test]
    fn test_five_versus_five_tie_break() {
        let scores: Vec<f64> = (0..10).map(|i| 1000.0 + i as f64 * 10.0).collect();
        let (a, b) = form_teams(&window(&scores));
        assert_eq!(ids(&a), vec!["p0", "p9", "p2", "p7", "p4"]);
        assert_eq!(ids(&b), vec!["p1", "p8", "p3", "p6", "p5"]);
    }

    #[test]
    fn test_three_versus_three_tie_break() {
        let scores: Vec<f64> = (0..6).map(|i| 1000.0 + i as f64).collect();
        let (a, b) = form_teams(&window(&scores));
        assert_eq!(ids(&a), vec!["p0", "p5", "p2"]);
        assert_eq!(ids(&b), vec!["p1", "p4", "p3"]);
    }

    #[test]
    fn test_empty_window() {
        let (a, b) = form_teams(&[]);
        assert!(a.is_empty());
        assert!(b.is_empty());
    }

    proptest! {
        #[test]
        fn prop_teams_are_equal_sized_partitions(team_size in 1usize..8, base in 500.0f64..2500.0) {
            let scores: Vec<f64> = (0..team_size * 2).map(|i| base + i as f64).collect();
            let tickets = window(&scores);
            let (a, b) = form_teams(&tickets);

            prop_assert_eq!(a.len(), team_size);
            prop_assert_eq!(b.len(), team_size);

            let mut all: Vec<&str> = ids(&a).into_iter().chain(ids(&b)).collect();
            all.sort();
            let mut expected: Vec<&str> = ids(&tickets);
            expected.sort();
            prop_assert_eq!(all, expected);
        }

        #[test]
        fn prop_formation_is_deterministic(team_size in 1usize..8) {
            let scores: Vec<f64> = (0..team_size * 2).map(|i| 1000.0 + (i * 7) as f64).collect();
            let tickets = window(&scores);
            prop_assert_eq!(form_teams(&tickets), form_teams(&tickets));
        }
    }
}
