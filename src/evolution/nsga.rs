use rand::Rng;

use crate::scoring::FitnessVec;

/// True when `a` Pareto-dominates `b` (both objectives maximized).
pub fn dominates(a: &FitnessVec, b: &FitnessVec) -> bool {
    a[0] >= b[0] && a[1] >= b[1] && (a[0] > b[0] || a[1] > b[1])
}

/// NSGA-II rank and crowding for one individual.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranked {
    pub index: usize,
    pub rank: usize,
    pub crowding: f64,
}

/// Fast non-dominated sort. Returns fronts of indices; front 0 is the
/// Pareto-optimal set.
pub fn non_dominated_sort(fitness: &[FitnessVec]) -> Vec<Vec<usize>> {
    let n = fitness.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count = vec![0usize; n];
    let mut fronts: Vec<Vec<usize>> = Vec::new();
    let mut first_front = Vec::new();

    for p in 0..n {
        for q in 0..n {
            if p == q {
                continue;
            }
            if dominates(&fitness[p], &fitness[q]) {
                dominated_by[p].push(q);
            } else if dominates(&fitness[q], &fitness[p]) {
                domination_count[p] += 1;
            }
        }
        if domination_count[p] == 0 {
            first_front.push(p);
        }
    }

    let mut current = first_front;
    while !current.is_empty() {
        let mut next = Vec::new();
        for &p in &current {
            for &q in &dominated_by[p] {
                domination_count[q] -= 1;
                if domination_count[q] == 0 {
                    next.push(q);
                }
            }
        }
        next.sort_unstable();
        fronts.push(std::mem::replace(&mut current, next));
    }

    fronts
}

/// Crowding distance within one front, aligned with the front's order.
pub fn crowding_distance(front: &[usize], fitness: &[FitnessVec]) -> Vec<f64> {
    let len = front.len();
    let mut distance = vec![0.0f64; len];
    if len <= 2 {
        return vec![f64::INFINITY; len];
    }

    for objective in 0..2 {
        let mut order: Vec<usize> = (0..len).collect();
        order.sort_by(|&a, &b| {
            fitness[front[a]][objective]
                .partial_cmp(&fitness[front[b]][objective])
                .expect("finite fitness")
        });

        let low = fitness[front[order[0]]][objective];
        let high = fitness[front[order[len - 1]]][objective];
        distance[order[0]] = f64::INFINITY;
        distance[order[len - 1]] = f64::INFINITY;
        let span = high - low;
        if span <= 0.0 {
            continue;
        }
        for w in 1..len - 1 {
            let prev = fitness[front[order[w - 1]]][objective];
            let next = fitness[front[order[w + 1]]][objective];
            distance[order[w]] += (next - prev) / span;
        }
    }

    distance
}

/// Rank and crowding for the whole population, indexed by individual.
pub fn rank_population(fitness: &[FitnessVec]) -> Vec<Ranked> {
    let fronts = non_dominated_sort(fitness);
    let mut ranked: Vec<Ranked> = (0..fitness.len())
        .map(|index| Ranked { index, rank: 0, crowding: 0.0 })
        .collect();

    for (rank, front) in fronts.iter().enumerate() {
        let crowding = crowding_distance(front, fitness);
        for (&index, &dist) in front.iter().zip(&crowding) {
            ranked[index].rank = rank;
            ranked[index].crowding = dist;
        }
    }

    ranked
}

/// Environmental selection: whole fronts in rank order, the straddling
/// front by descending crowding (ties to the lower index).
pub fn select_best(fitness: &[FitnessVec], k: usize) -> Vec<usize> {
    let fronts = non_dominated_sort(fitness);
    let mut selected = Vec::with_capacity(k);

    for front in fronts {
        if selected.len() >= k {
            break;
        }
        if selected.len() + front.len() <= k {
            selected.extend(front);
            continue;
        }
        let crowding = crowding_distance(&front, fitness);
        let mut order: Vec<usize> = (0..front.len()).collect();
        order.sort_by(|&a, &b| {
            crowding[b]
                .partial_cmp(&crowding[a])
                .expect("crowding is never NaN")
                .then(front[a].cmp(&front[b]))
        });
        for w in order {
            if selected.len() >= k {
                break;
            }
            selected.push(front[w]);
        }
    }

    selected
}

/// Binary tournament on (rank, crowding): lower rank wins, then larger
/// crowding, then lower index.
pub fn binary_tournament<R: Rng>(ranked: &[Ranked], rng: &mut R) -> usize {
    let a = &ranked[rng.gen_range(0..ranked.len())];
    let b = &ranked[rng.gen_range(0..ranked.len())];
    let winner = match a.rank.cmp(&b.rank) {
        std::cmp::Ordering::Less => a,
        std::cmp::Ordering::Greater => b,
        std::cmp::Ordering::Equal => {
            if a.crowding > b.crowding {
                a
            } else if b.crowding > a.crowding {
                b
            } else if a.index <= b.index {
                a
            } else {
                b
            }
        }
    };
    winner.index
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_simple_fronts() {
        let fitness = vec![
            [1.0, 1.0], // dominated by all of the front
            [2.0, 3.0],
            [3.0, 2.0],
            [4.0, 4.0], // dominates everything
        ];
        let fronts = non_dominated_sort(&fitness);
        assert_eq!(fronts[0], vec![3]);
        assert_eq!(fronts[1], vec![1, 2]);
        assert_eq!(fronts[2], vec![0]);
    }

    #[test]
    fn test_no_cross_rank_domination() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let fitness: Vec<FitnessVec> = (0..60)
            .map(|_| [rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0)])
            .collect();
        let fronts = non_dominated_sort(&fitness);

        for (r, front) in fronts.iter().enumerate() {
            for &p in front {
                for better in fronts.iter().take(r) {
                    for &q in better {
                        assert!(
                            !dominates(&fitness[p], &fitness[q]),
                            "rank {r} member dominates an earlier rank"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_boundary_points_get_infinite_crowding() {
        let fitness = vec![[1.0, 4.0], [2.0, 3.0], [3.0, 2.0], [4.0, 1.0]];
        let front: Vec<usize> = (0..4).collect();
        let crowding = crowding_distance(&front, &fitness);
        assert!(crowding[0].is_infinite());
        assert!(crowding[3].is_infinite());
        assert!(crowding[1].is_finite());
        assert!(crowding[2].is_finite());
    }

    #[test]
    fn test_select_best_prefers_first_front() {
        let fitness = vec![[1.0, 1.0], [5.0, 5.0], [4.0, 6.0], [0.5, 0.5]];
        let selected = select_best(&fitness, 2);
        assert_eq!(selected, vec![1, 2]);
    }

    #[test]
    fn test_tournament_favors_lower_rank() {
        let ranked = vec![
            Ranked { index: 0, rank: 3, crowding: f64::INFINITY },
            Ranked { index: 1, rank: 0, crowding: 0.1 },
        ];
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut wins = 0;
        for _ in 0..100 {
            if binary_tournament(&ranked, &mut rng) == 1 {
                wins += 1;
            }
        }
        // Index 1 loses only when the tournament draws index 0 twice.
        assert!(wins > 60);
    }
}
