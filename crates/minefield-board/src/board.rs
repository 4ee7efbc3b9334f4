use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::solver;
use crate::stats::{self, Statistics};

/// `(row, col)` position on the board.
pub type Coord = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BoardState {
    /// No cell has been opened and no mine has been placed yet.
    Fresh = 0,
    Playing = 1,
    Won = 2,
    Lost = 3,
}

impl BoardState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BoardState::Won | BoardState::Lost)
    }
}

/// Cell as seen by players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cell {
    Hidden,
    /// Opened safe cell with its neighbouring mine count.
    Open(u8),
    /// Mine revealed after the board was cleared.
    Flagged,
    /// Mine somebody stepped on.
    Stepped,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("board needs at least one row and one column")]
    EmptyBoard,
    #[error("a board needs at least one mine")]
    NoMines,
    #[error("too many mines: {mines} mines do not fit in {cells} cells")]
    TooManyMines { mines: usize, cells: usize },
    #[error("cell ({row}, {col}) is outside the board")]
    OutOfBounds { row: usize, col: usize },
}

/// Validates board dimensions before a board is built.
pub fn check_params(height: usize, width: usize, mines: usize) -> Result<(), BoardError> {
    if height == 0 || width == 0 {
        return Err(BoardError::EmptyBoard);
    }
    if mines == 0 {
        return Err(BoardError::NoMines);
    }
    let cells = height * width;
    if mines >= cells {
        return Err(BoardError::TooManyMines { mines, cells });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    height: usize,
    width: usize,
    mines: usize,
    seed: u64,
    state: BoardState,
    mine_mask: Vec<bool>,
    counts: Vec<u8>,
    grid: Vec<Cell>,
    mines_opened: usize,
    guess_free: bool,
}

impl Board {
    pub fn new(height: usize, width: usize, mines: usize, seed: u64) -> Result<Self, BoardError> {
        check_params(height, width, mines)?;
        Ok(Self {
            height,
            width,
            mines,
            seed,
            state: BoardState::Fresh,
            mine_mask: Vec::new(),
            counts: Vec::new(),
            grid: vec![Cell::Hidden; height * width],
            mines_opened: 0,
            guess_free: false,
        })
    }

    /// Board with a random layout seed.
    pub fn random(height: usize, width: usize, mines: usize) -> Result<Self, BoardError> {
        Self::new(height, width, mines, rand::random())
    }

    /// Stable 64-bit digest of the initial configuration.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update((self.height as u64).to_le_bytes());
        hasher.update((self.width as u64).to_le_bytes());
        hasher.update((self.mines as u64).to_le_bytes());
        hasher.update(self.seed.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        // Keep it positive so it reads naturally in callback payloads.
        u64::from_le_bytes(bytes) >> 1
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn mines(&self) -> usize {
        self.mines
    }

    pub fn mines_opened(&self) -> usize {
        self.mines_opened
    }

    pub fn state(&self) -> BoardState {
        self.state
    }

    /// Whether the layout can be cleared from the first tap without guessing.
    /// Always false before the first reveal.
    pub fn guess_free(&self) -> bool {
        self.guess_free
    }

    /// Row-major visible grid.
    pub fn grid(&self) -> &[Cell] {
        &self.grid
    }

    pub fn cell(&self, (row, col): Coord) -> Option<Cell> {
        if row < self.height && col < self.width {
            Some(self.grid[row * self.width + col])
        } else {
            None
        }
    }

    /// Puts a lost board back into play after a life was spent. The stepped
    /// mine stays visible.
    pub fn resume(&mut self) {
        if self.state == BoardState::Lost {
            self.state = BoardState::Playing;
        }
    }

    /// Opens a cell. Taps on finished boards and on already opened cells
    /// leave the board untouched.
    pub fn reveal(&mut self, (row, col): Coord) -> Result<BoardState, BoardError> {
        if row >= self.height || col >= self.width {
            return Err(BoardError::OutOfBounds { row, col });
        }
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        let index = row * self.width + col;
        if self.state == BoardState::Fresh {
            self.lay_mines(index);
            self.state = BoardState::Playing;
        }
        if self.grid[index] != Cell::Hidden {
            return Ok(self.state);
        }

        if self.mine_mask[index] {
            self.grid[index] = Cell::Stepped;
            self.mines_opened += 1;
            self.state = BoardState::Lost;
            return Ok(self.state);
        }

        self.flood_open(index);
        if self.safe_cells_left() == 0 {
            for (cell, &mine) in self.grid.iter_mut().zip(&self.mine_mask) {
                if mine && *cell == Cell::Hidden {
                    *cell = Cell::Flagged;
                }
            }
            self.state = BoardState::Won;
        }
        Ok(self.state)
    }

    /// Openings, islands and 3BV of the laid out board.
    pub fn statistics(&self) -> Statistics {
        if self.mine_mask.is_empty() {
            return Statistics::default();
        }
        stats::compute(self.height, self.width, &self.mine_mask, &self.counts)
    }

    pub(crate) fn neighbours(height: usize, width: usize, index: usize) -> impl Iterator<Item = usize> {
        let row = index / width;
        let col = index % width;
        let rows = row.saturating_sub(1)..=(row + 1).min(height - 1);
        rows.flat_map(move |r| {
            let cols = col.saturating_sub(1)..=(col + 1).min(width - 1);
            cols.map(move |c| r * width + c)
        })
        .filter(move |&n| n != index)
    }

    fn lay_mines(&mut self, first: usize) {
        let cells = self.height * self.width;
        let mut excluded: Vec<usize> = Self::neighbours(self.height, self.width, first).collect();
        excluded.push(first);
        if cells - excluded.len() < self.mines {
            excluded = vec![first];
        }

        let mut candidates: Vec<usize> = (0..cells).filter(|i| !excluded.contains(i)).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        candidates.shuffle(&mut rng);

        self.mine_mask = vec![false; cells];
        for &index in candidates.iter().take(self.mines) {
            self.mine_mask[index] = true;
        }
        self.counts = (0..cells)
            .map(|i| {
                Self::neighbours(self.height, self.width, i)
                    .filter(|&n| self.mine_mask[n])
                    .count() as u8
            })
            .collect();
        self.guess_free =
            solver::solvable_from(self.height, self.width, &self.mine_mask, &self.counts, first);
    }

    fn flood_open(&mut self, start: usize) {
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            if self.grid[index] != Cell::Hidden || self.mine_mask[index] {
                continue;
            }
            let count = self.counts[index];
            self.grid[index] = Cell::Open(count);
            if count == 0 {
                stack.extend(Self::neighbours(self.height, self.width, index));
            }
        }
    }

    fn safe_cells_left(&self) -> usize {
        self.grid
            .iter()
            .zip(&self.mine_mask)
            .filter(|(cell, mine)| !**mine && **cell == Cell::Hidden)
            .count()
    }

    #[cfg(test)]
    pub(crate) fn is_mine(&self, (row, col): Coord) -> bool {
        self.mine_mask
            .get(row * self.width + col)
            .copied()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn safe_cells(board: &Board) -> Vec<Coord> {
        let mut cells = Vec::new();
        for row in 0..board.height() {
            for col in 0..board.width() {
                if !board.is_mine((row, col)) {
                    cells.push((row, col));
                }
            }
        }
        cells
    }

    #[test_timeout::timeout]
    fn rejects_bad_params() {
        assert_eq!(check_params(0, 8, 3), Err(BoardError::EmptyBoard));
        assert_eq!(check_params(8, 8, 0), Err(BoardError::NoMines));
        assert_eq!(
            check_params(2, 2, 4),
            Err(BoardError::TooManyMines { mines: 4, cells: 4 })
        );
        assert!(check_params(8, 8, 9).is_ok());
    }

    #[test_timeout::timeout]
    fn first_reveal_is_safe_and_lays_mines() {
        for seed in 0..32 {
            let mut board = Board::new(8, 8, 9, seed).unwrap();
            assert_eq!(board.state(), BoardState::Fresh);
            let state = board.reveal((3, 4)).unwrap();
            assert_ne!(state, BoardState::Lost);
            assert!(!board.is_mine((3, 4)));
            assert_eq!(board.mine_mask.iter().filter(|m| **m).count(), 9);
        }
    }

    #[test_timeout::timeout]
    fn opening_every_safe_cell_wins_and_flags_mines() {
        let mut board = Board::new(8, 8, 9, 7).unwrap();
        board.reveal((0, 0)).unwrap();
        for cell in safe_cells(&board) {
            board.reveal(cell).unwrap();
        }
        assert_eq!(board.state(), BoardState::Won);
        let flagged = board.grid().iter().filter(|c| **c == Cell::Flagged).count();
        assert_eq!(flagged, 9);
    }

    #[test_timeout::timeout]
    fn stepping_on_a_mine_loses_and_resume_keeps_the_mark() {
        let mut board = Board::new(8, 8, 9, 11).unwrap();
        board.reveal((0, 0)).unwrap();
        let mine = (0..8)
            .flat_map(|r| (0..8).map(move |c| (r, c)))
            .find(|&c| board.is_mine(c))
            .unwrap();
        assert_eq!(board.reveal(mine).unwrap(), BoardState::Lost);
        assert_eq!(board.cell(mine), Some(Cell::Stepped));
        assert_eq!(board.mines_opened(), 1);

        board.resume();
        assert_eq!(board.state(), BoardState::Playing);
        assert_eq!(board.cell(mine), Some(Cell::Stepped));
    }

    #[test_timeout::timeout]
    fn repeated_tap_leaves_grid_untouched() {
        let mut board = Board::new(8, 8, 9, 3).unwrap();
        board.reveal((4, 4)).unwrap();
        let before = board.grid().to_vec();
        board.reveal((4, 4)).unwrap();
        assert_eq!(before, board.grid());
    }

    #[test_timeout::timeout]
    fn out_of_bounds_is_an_error() {
        let mut board = Board::new(4, 4, 2, 1).unwrap();
        assert_eq!(
            board.reveal((4, 0)),
            Err(BoardError::OutOfBounds { row: 4, col: 0 })
        );
        assert_eq!(board.state(), BoardState::Fresh);
    }

    #[test_timeout::timeout]
    fn fingerprint_depends_on_configuration() {
        let a = Board::new(8, 8, 9, 42).unwrap();
        let b = Board::new(8, 8, 9, 42).unwrap();
        let c = Board::new(8, 8, 9, 43).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test_timeout::timeout]
    fn serde_keeps_layout_and_progress() {
        let mut board = Board::new(6, 6, 5, 9).unwrap();
        board.reveal((2, 2)).unwrap();
        let json = serde_json::to_string(&board).unwrap();
        let restored: Board = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.grid(), board.grid());
        assert_eq!(restored.state(), board.state());
        assert_eq!(restored.statistics(), board.statistics());
    }
}
