//! Deterministic solver used to classify a layout as guess-free.
//!
//! Starting from the first opened cell it applies single-cell counting,
//! pairwise subset reasoning and global mine counting until it either clears
//! every safe cell or stalls.

use crate::board::Board;

struct Knowledge<'a> {
    height: usize,
    width: usize,
    mine_mask: &'a [bool],
    counts: &'a [u8],
    revealed: Vec<bool>,
    flagged: Vec<bool>,
}

struct Constraint {
    unknown: Vec<usize>,
    mines: usize,
}

impl<'a> Knowledge<'a> {
    fn reveal(&mut self, start: usize) {
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            if self.revealed[index] || self.flagged[index] || self.mine_mask[index] {
                continue;
            }
            self.revealed[index] = true;
            if self.counts[index] == 0 {
                stack.extend(Board::neighbours(self.height, self.width, index));
            }
        }
    }

    fn is_unknown(&self, index: usize) -> bool {
        !self.revealed[index] && !self.flagged[index]
    }

    fn constraints(&self) -> Vec<Constraint> {
        let mut out: Vec<Constraint> = Vec::new();
        for index in 0..self.revealed.len() {
            if !self.revealed[index] || self.counts[index] == 0 {
                continue;
            }
            let mut unknown = Vec::new();
            let mut flagged = 0usize;
            for n in Board::neighbours(self.height, self.width, index) {
                if self.flagged[n] {
                    flagged += 1;
                } else if !self.revealed[n] {
                    unknown.push(n);
                }
            }
            if unknown.is_empty() {
                continue;
            }
            let mines = (self.counts[index] as usize).saturating_sub(flagged);
            if !out.iter().any(|c| c.unknown == unknown) {
                out.push(Constraint { unknown, mines });
            }
        }
        out
    }

    /// Applies one round of deductions. Returns whether anything changed.
    fn step(&mut self, total_mines: usize) -> bool {
        let mut safe: Vec<usize> = Vec::new();
        let mut mines: Vec<usize> = Vec::new();

        let constraints = self.constraints();
        for c in &constraints {
            if c.mines == 0 {
                safe.extend(&c.unknown);
            } else if c.mines == c.unknown.len() {
                mines.extend(&c.unknown);
            }
        }

        if safe.is_empty() && mines.is_empty() {
            for a in &constraints {
                for b in &constraints {
                    if a.unknown.len() >= b.unknown.len()
                        || !a.unknown.iter().all(|x| b.unknown.contains(x))
                    {
                        continue;
                    }
                    let diff: Vec<usize> = b
                        .unknown
                        .iter()
                        .copied()
                        .filter(|x| !a.unknown.contains(x))
                        .collect();
                    let extra = b.mines.saturating_sub(a.mines);
                    if extra == 0 {
                        safe.extend(&diff);
                    } else if extra == diff.len() {
                        mines.extend(&diff);
                    }
                }
            }
        }

        if safe.is_empty() && mines.is_empty() {
            let flagged = self.flagged.iter().filter(|f| **f).count();
            let unknown: Vec<usize> = (0..self.revealed.len())
                .filter(|&i| self.is_unknown(i))
                .collect();
            let left = total_mines.saturating_sub(flagged);
            if left == 0 {
                safe = unknown;
            } else if left == unknown.len() {
                mines = unknown;
            }
        }

        let mut progress = false;
        for index in mines {
            if !self.flagged[index] {
                self.flagged[index] = true;
                progress = true;
            }
        }
        for index in safe {
            if self.is_unknown(index) {
                self.reveal(index);
                progress = true;
            }
        }
        progress
    }

    fn cleared(&self) -> bool {
        self.mine_mask
            .iter()
            .zip(&self.revealed)
            .all(|(mine, revealed)| *mine || *revealed)
    }
}

pub(crate) fn solvable_from(
    height: usize,
    width: usize,
    mine_mask: &[bool],
    counts: &[u8],
    first: usize,
) -> bool {
    let total_mines = mine_mask.iter().filter(|m| **m).count();
    let mut knowledge = Knowledge {
        height,
        width,
        mine_mask,
        counts,
        revealed: vec![false; mine_mask.len()],
        flagged: vec![false; mine_mask.len()],
    };
    knowledge.reveal(first);
    while !knowledge.cleared() {
        if !knowledge.step(total_mines) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts_for(height: usize, width: usize, mask: &[bool]) -> Vec<u8> {
        (0..mask.len())
            .map(|i| {
                Board::neighbours(height, width, i)
                    .filter(|&n| mask[n])
                    .count() as u8
            })
            .collect()
    }

    #[test_timeout::timeout]
    fn corner_mine_is_deducible() {
        // 3x3 with a single mine in the corner: opening the far corner
        // cascades over every safe cell.
        let mut mask = vec![false; 9];
        mask[0] = true;
        let counts = counts_for(3, 3, &mask);
        assert!(solvable_from(3, 3, &mask, &counts, 8));
    }

    #[test_timeout::timeout]
    fn fifty_fifty_needs_a_guess() {
        // a b c
        // d e f    mine at c: b and e both see one mine among {c, f}.
        let mut mask = vec![false; 6];
        mask[2] = true;
        let counts = counts_for(2, 3, &mask);
        assert!(!solvable_from(2, 3, &mask, &counts, 0));
    }

    #[test_timeout::timeout]
    fn strip_is_solved_by_counting() {
        let mask = vec![false, false, false, true];
        let counts = counts_for(1, 4, &mask);
        assert!(solvable_from(1, 4, &mask, &counts, 0));
    }
}
