use serde::{Deserialize, Serialize};

use crate::board::Board;

/// Layout statistics reported when a game ends.
///
/// `bbbv` (3BV) is the minimum number of clicks needed to clear the board and
/// is the complexity score used to scale rewards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub openings: usize,
    pub islands: usize,
    pub bbbv: usize,
}

pub(crate) fn compute(height: usize, width: usize, mine_mask: &[bool], counts: &[u8]) -> Statistics {
    let cells = mine_mask.len();
    let is_zero = |i: usize| !mine_mask[i] && counts[i] == 0;
    let touches_zero =
        |i: usize| Board::neighbours(height, width, i).any(|n| is_zero(n));
    // Numbered cells that no opening would uncover on its own.
    let lonely = |i: usize| !mine_mask[i] && counts[i] > 0 && !touches_zero(i);

    let openings = components(height, width, cells, &is_zero);
    let islands = components(height, width, cells, &lonely);
    let lonely_cells = (0..cells).filter(|&i| lonely(i)).count();

    Statistics {
        openings,
        islands,
        bbbv: openings + lonely_cells,
    }
}

fn components(height: usize, width: usize, cells: usize, member: impl Fn(usize) -> bool) -> usize {
    let mut seen = vec![false; cells];
    let mut count = 0;
    for start in 0..cells {
        if seen[start] || !member(start) {
            continue;
        }
        count += 1;
        let mut stack = vec![start];
        seen[start] = true;
        while let Some(index) = stack.pop() {
            for n in Board::neighbours(height, width, index) {
                if !seen[n] && member(n) {
                    seen[n] = true;
                    stack.push(n);
                }
            }
        }
    }
    count
}
